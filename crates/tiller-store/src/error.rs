use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// A UNIQUE / CHECK / FOREIGN KEY constraint was violated. Surfaced to
    /// handlers as a validation error, not a 500.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The row addressed by the operation does not exist.
    #[error("row not found: {0}")]
    NotFound(String),

    /// A migration batch failed to apply.
    #[error("migration {version} failed: {message}")]
    Migration { version: i64, message: String },

    /// The schema's vector dimension does not match the configured model.
    #[error("embedding dimension mismatch: schema {expected}, configured model {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(f, ref msg) = e {
            if f.code == rusqlite::ffi::ErrorCode::ConstraintViolation {
                return StoreError::Constraint(
                    msg.clone().unwrap_or_else(|| "constraint violation".to_string()),
                );
            }
        }
        StoreError::Database(e)
    }
}

impl From<StoreError> for tiller_core::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Constraint(m) => tiller_core::Error::Validation(m),
            StoreError::NotFound(m) => tiller_core::Error::NotFound(m),
            StoreError::DimensionMismatch { expected, actual } => {
                tiller_core::Error::DimensionMismatch { expected, actual }
            }
            other => tiller_core::Error::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
