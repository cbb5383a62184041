use serde::{Deserialize, Serialize};
use tiller_runtime::GenerateStats;
use tokio::sync::mpsc;

/// One inbound chat turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub options: Option<ChatOptions>,
}

/// Per-request overrides of the model's stored generation config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Events fanned out to a streaming client. Ordered: zero or more `Token`s,
/// then exactly one `Done` or `Error`.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Token { content: String },
    Done { metadata: DoneMetadata },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DoneMetadata {
    pub model: String,
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub eval_tokens: u32,
}

impl From<(&str, GenerateStats)> for DoneMetadata {
    fn from((model, stats): (&str, GenerateStats)) -> Self {
        Self {
            model: model.to_string(),
            total_tokens: stats.total_tokens,
            prompt_tokens: stats.prompt_tokens,
            eval_tokens: stats.eval_tokens,
        }
    }
}

/// Full reply for the non-streaming mode.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub reply: String,
    pub model: String,
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub eval_tokens: u32,
}

/// What a chat turn resolves to once validation and session setup are done.
#[derive(Debug)]
pub enum ChatOutcome {
    /// Streaming: the session id is known up front; events follow.
    Stream {
        session_id: String,
        events: mpsc::Receiver<ChatEvent>,
    },
    Reply(ChatReply),
}
