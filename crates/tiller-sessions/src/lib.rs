pub mod error;
pub mod projects;
pub mod sessions;
pub mod types;

pub use error::SessionError;
pub use projects::ProjectStore;
pub use sessions::SessionStore;
pub use types::{Message, Project, Session};
