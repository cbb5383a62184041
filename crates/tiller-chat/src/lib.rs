pub mod context;
pub mod error;
pub mod orchestrator;
pub mod types;

pub use error::ChatError;
pub use orchestrator::ChatOrchestrator;
pub use types::{ChatEvent, ChatOptions, ChatOutcome, ChatReply, ChatRequest, DoneMetadata};
