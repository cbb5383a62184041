use thiserror::Error;
use tiller_runtime::RuntimeError;
use tiller_store::StoreError;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not found: {0}")]
    NotFound(String),

    /// The operation is not legal from the row's current status.
    #[error("invalid model state: {0}")]
    InvalidState(String),

    /// A download job for this model is already running.
    #[error("download already in progress for {0}")]
    AlreadyDownloading(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<rusqlite::Error> for ModelError {
    fn from(e: rusqlite::Error) -> Self {
        ModelError::Store(e.into())
    }
}

impl From<ModelError> for tiller_core::Error {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::NotFound(m) => tiller_core::Error::NotFound(m),
            ModelError::InvalidState(m) => tiller_core::Error::Validation(m),
            ModelError::AlreadyDownloading(m) => {
                tiller_core::Error::Conflict(format!("download already in progress for {m}"))
            }
            ModelError::Validation(m) => tiller_core::Error::Validation(m),
            ModelError::Store(s) => s.into(),
            ModelError::Runtime(r) => r.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
