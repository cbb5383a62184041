use thiserror::Error;
use tiller_store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email or password. Deliberately does not say which.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Missing, malformed, expired, or revoked bearer token.
    #[error("invalid or expired token")]
    TokenInvalid,

    #[error("username already taken")]
    UsernameTaken,

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid input: {0}")]
    Validation(String),

    /// Password hashing failed: an internal fault, never a user error.
    #[error("hashing error: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Store(e.into())
    }
}

impl From<AuthError> for tiller_core::Error {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::TokenInvalid => {
                tiller_core::Error::Unauthorized(e.to_string())
            }
            AuthError::UsernameTaken | AuthError::EmailTaken => {
                tiller_core::Error::Validation(e.to_string())
            }
            AuthError::Validation(m) => tiller_core::Error::Validation(m),
            AuthError::Hashing(m) => tiller_core::Error::Internal(m),
            AuthError::Store(s) => s.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
