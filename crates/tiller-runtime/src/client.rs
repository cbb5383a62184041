use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tiller_core::Role;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A model installed in the runtime, as reported by its catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub family: String,
    pub format: String,
    pub parameter_size: String,
    pub quantization: String,
}

/// A single turn in the prompt sent to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling and budget knobs forwarded to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repeat_penalty: f64,
    /// Context window in tokens (`num_ctx` on the wire).
    pub context_length: u32,
    /// Generation budget in tokens (`num_predict` on the wire).
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            context_length: 4096,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerateOptions,
}

/// Terminal statistics of one generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GenerateStats {
    pub prompt_tokens: u32,
    pub eval_tokens: u32,
    pub total_tokens: u32,
}

/// Full (non-streaming) reply.
#[derive(Debug, Clone)]
pub struct GenerateReply {
    pub content: String,
    pub model: String,
    pub stats: GenerateStats,
}

/// Events emitted during a streaming generation. Ordered: zero or more
/// `Token`s followed by exactly one `Done` or `Error`.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    Token { text: String },
    Done { stats: GenerateStats },
    Error { message: String },
}

/// One progress event from a background model pull. The runtime may emit
/// heartbeats where `completed`/`total` do not advance.
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    pub status: String,
    pub completed: u64,
    pub total: u64,
}

/// Thin contract over the LLM runtime. Everything the orchestration layer
/// needs, nothing about the wire format leaks past this trait.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Models currently installed in the runtime.
    async fn list_installed(&self) -> Result<Vec<ModelDescriptor>>;

    /// Non-streaming generation: wait for the full reply.
    async fn generate(
        &self,
        req: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateReply>;

    /// Streaming generation: text fragments through `tx`, terminated by
    /// exactly one `Done` or `Error` event.
    async fn generate_stream(
        &self,
        req: &GenerateRequest,
        tx: mpsc::Sender<TokenEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Embed `text` with `model`. Vector length depends on the model.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;

    /// Start a model pull; progress events flow through `tx` until the
    /// stream ends. A clean end with a final `success` status means the
    /// model is installed.
    async fn pull(
        &self,
        name: &str,
        tx: mpsc::Sender<PullProgress>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Remove a model from the runtime. `NotFound` when it is not installed.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Cheap liveness probe.
    async fn health(&self) -> Result<()>;
}
