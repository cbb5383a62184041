pub mod config;
pub mod error;
pub mod problem;
pub mod types;

pub use config::TillerConfig;
pub use error::{Error, Result};
pub use problem::Problem;
pub use types::Role;
