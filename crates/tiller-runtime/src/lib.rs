pub mod client;
pub mod error;
pub mod ollama;
pub mod registry;

pub use client::{
    ChatMessage, GenerateOptions, GenerateReply, GenerateRequest, GenerateStats, ModelDescriptor,
    PullProgress, RuntimeClient, TokenEvent,
};
pub use error::RuntimeError;
pub use ollama::OllamaRuntime;
pub use registry::{AvailableModelsSource, LibraryScrapeSource};
