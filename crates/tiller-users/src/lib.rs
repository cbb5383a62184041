pub mod error;
pub mod service;
pub mod types;

pub use error::AuthError;
pub use service::AuthService;
pub use types::User;
