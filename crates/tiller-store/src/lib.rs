pub mod error;
pub mod migrations;
pub mod store;

pub use error::StoreError;
pub use store::Store;
