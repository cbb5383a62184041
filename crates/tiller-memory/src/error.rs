use thiserror::Error;
use tiller_store::StoreError;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The configured embedding model is not installed in the runtime.
    #[error("embedding model missing: {0}")]
    ModelMissing(String),

    /// The runtime could not be reached for an embedding call.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The model produced a vector of a different length than the schema.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Store(e.into())
    }
}

impl From<MemoryError> for tiller_core::Error {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::ModelMissing(m) => tiller_core::Error::Validation(m),
            MemoryError::RuntimeUnavailable(m) => tiller_core::Error::RuntimeUnavailable(m),
            MemoryError::DimensionMismatch { expected, actual } => {
                tiller_core::Error::DimensionMismatch { expected, actual }
            }
            MemoryError::Store(s) => s.into(),
            MemoryError::InvalidInput(m) => tiller_core::Error::Validation(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
