/// Shared error type used across all VoxAgent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("auth: {0}")]
    Auth(String),

    /// The LLM or a tool upstream failed with a definitive error.
    #[error("upstream HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    /// A network blip or similar condition that may succeed on retry.
    #[error("transient: {0}")]
    Transient(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Cooperative cancellation; surfaced as a `cancelled` event, never
    /// as an `error` event.
    #[error("cancelled")]
    Cancelled,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wire error code carried by `error` events.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Auth(_) => "AUTH",
            Error::Upstream { .. } => "UPSTREAM",
            Error::Transient(_) | Error::Timeout(_) => "TRANSIENT",
            Error::Cancelled => "CANCELLED",
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status this error maps to at the API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Auth(_) => 401,
            Error::Upstream { .. } | Error::Transient(_) | Error::Timeout(_) => 502,
            Error::Cancelled => 499,
            _ => 500,
        }
    }
}
