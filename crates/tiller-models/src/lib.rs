pub mod cache;
pub mod catalog;
pub mod download;
pub mod error;
pub mod manager;
pub mod types;

pub use cache::AvailableModelsCache;
pub use error::ModelError;
pub use manager::ModelManager;
pub use types::{
    CacheInfo, DownloadStatus, ModelConfig, ModelConfigPatch, ModelPatch, ModelRecord, ModelStatus,
};
