//! Error types for modelgate

/// Result type alias using modelgate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for modelgate operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reference string matches none of the supported grammars
    #[error("invalid model reference: {0}")]
    InvalidReference(String),

    /// Object, model or version does not exist upstream
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, auth or timeout failure while downloading
    #[error("fetch error: {0}")]
    Fetch(String),

    /// No recognizable model layout in an artifact
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),

    /// Deserialization failure on a recognized model file
    #[error("load error: {0}")]
    Load(String),

    /// Resolution or loading failed for the requested model
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Feature payload cannot be shaped into the predictor's row format
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new invalid reference error
    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create a new load error
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create a new model unavailable error
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short stable name of the error kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidReference(_) => "invalid_reference",
            Self::NotFound(_) => "not_found",
            Self::Fetch(_) => "fetch",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Load(_) => "load",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::InvalidInput(_) => "invalid_input",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}
