//! modelgate Server
//!
//! HTTP surface over the prediction service:
//! - `POST /predict` and `POST /predict/{version}` run single-row predictions
//! - `GET /health` reports whether the default model is loaded
//! - `GET /metrics` renders Prometheus metrics

pub mod config;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ConfigArgs, ServerConfig};
pub use routes::create_router;
pub use state::AppState;
