use thiserror::Error;
use tiller_store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The addressed session or project does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource exists but belongs to a different user.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for SessionError {
    fn from(e: rusqlite::Error) -> Self {
        SessionError::Store(e.into())
    }
}

impl From<SessionError> for tiller_core::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(m) => tiller_core::Error::NotFound(m),
            SessionError::Forbidden(m) => tiller_core::Error::Forbidden(m),
            SessionError::Store(s) => s.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
