//! modelgate Core
//!
//! Core types and utilities shared across modelgate components.
//!
//! This crate provides:
//! - Model reference parsing for registry and object-storage URIs
//! - Error types and result handling
//! - Feature rows and prediction labels exchanged with predictors

pub mod error;
pub mod reference;
pub mod types;

pub use error::{Error, Result};
pub use reference::{ModelReference, StorageLocation};
pub use types::{FeatureRow, Label};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::reference::{ModelReference, StorageLocation};
    pub use crate::types::{FeatureRow, Label};
}
