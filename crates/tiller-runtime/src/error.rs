use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime could not be reached (connection refused, timeout,
    /// connection reset). Always transient.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime answered with a non-success HTTP status.
    #[error("runtime API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The runtime answered but the body did not parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// The addressed model does not exist in the runtime.
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RuntimeError {
    /// Transient failures may be retried with a fresh connection;
    /// permanent ones must surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            RuntimeError::Unavailable(_) => true,
            RuntimeError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Classify a reqwest transport error the same way for every call site.
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            RuntimeError::Unavailable(e.to_string())
        } else {
            RuntimeError::Api {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

impl From<RuntimeError> for tiller_core::Error {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotFound(m) => tiller_core::Error::NotFound(m),
            RuntimeError::Api { status, message } if status < 500 && status != 0 => {
                tiller_core::Error::Validation(message)
            }
            RuntimeError::Cancelled => tiller_core::Error::Internal("cancelled".to_string()),
            other => tiller_core::Error::RuntimeUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
