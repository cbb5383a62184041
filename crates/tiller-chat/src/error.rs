use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Session(#[from] tiller_sessions::SessionError),

    #[error(transparent)]
    Model(#[from] tiller_models::ModelError),

    #[error(transparent)]
    Runtime(#[from] tiller_runtime::RuntimeError),

    #[error(transparent)]
    Store(#[from] tiller_store::StoreError),
}

impl From<ChatError> for tiller_core::Error {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Validation(m) => tiller_core::Error::Validation(m),
            ChatError::Session(s) => s.into(),
            ChatError::Model(m) => m.into(),
            ChatError::Runtime(r) => r.into(),
            ChatError::Store(s) => s.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
