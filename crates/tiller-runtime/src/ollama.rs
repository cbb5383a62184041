use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tiller_core::Role;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{
    GenerateReply, GenerateRequest, GenerateStats, ModelDescriptor, PullProgress, RuntimeClient,
    TokenEvent,
};
use crate::error::{Result, RuntimeError};

/// Ollama-compatible runtime client.
pub struct OllamaRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaRuntime {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Separate client without a total-request timeout: streaming calls
    /// (generation, pulls) are bounded by their own deadlines, not by the
    /// non-streaming HTTP timeout.
    fn streaming_client() -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default()
    }

    fn build_chat_body(req: &GenerateRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role,
                    "content": m.content,
                })
            })
            .collect();

        serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": req.options.temperature,
                "top_p": req.options.top_p,
                "top_k": req.options.top_k,
                "repeat_penalty": req.options.repeat_penalty,
                "num_ctx": req.options.context_length,
                "num_predict": req.options.max_tokens,
            },
        })
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "runtime API error");
            if status == 404 {
                return Err(RuntimeError::NotFound(text));
            }
            return Err(RuntimeError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl RuntimeClient for OllamaRuntime {
    async fn list_installed(&self) -> Result<Vec<ModelDescriptor>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(RuntimeError::from_transport)?;
        let resp = Self::check_status(resp).await?;

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| RuntimeError::Parse(e.to_string()))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| {
                let details = m.details.unwrap_or_default();
                ModelDescriptor {
                    name: m.name,
                    size_bytes: m.size,
                    family: details.family,
                    format: details.format,
                    parameter_size: details.parameter_size,
                    quantization: details.quantization_level,
                }
            })
            .collect())
    }

    async fn generate(
        &self,
        req: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateReply> {
        let body = Self::build_chat_body(req, false);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, "sending generate request");

        let fut = async {
            let resp = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(RuntimeError::from_transport)?;
            let resp = Self::check_status(resp).await?;
            resp.json::<ChatResponse>()
                .await
                .map_err(|e| RuntimeError::Parse(e.to_string()))
        };

        let api_resp = tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            r = fut => r?,
        };

        let prompt_tokens = api_resp.prompt_eval_count.unwrap_or(0);
        let eval_tokens = api_resp.eval_count.unwrap_or(0);
        Ok(GenerateReply {
            content: api_resp.message.content,
            model: api_resp.model,
            stats: GenerateStats {
                prompt_tokens,
                eval_tokens,
                total_tokens: prompt_tokens + eval_tokens,
            },
        })
    }

    async fn generate_stream(
        &self,
        req: &GenerateRequest,
        tx: mpsc::Sender<TokenEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let body = Self::build_chat_body(req, true);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, "sending streaming generate request");

        let resp = Self::streaming_client()
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(RuntimeError::from_transport)?;
        let resp = Self::check_status(resp).await?;

        process_chat_stream(resp, tx, cancel).await;
        Ok(())
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "prompt": text });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(RuntimeError::from_transport)?;
        let resp = Self::check_status(resp).await?;

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| RuntimeError::Parse(e.to_string()))?;
        if parsed.embedding.is_empty() {
            return Err(RuntimeError::Parse("empty embedding vector".to_string()));
        }
        Ok(parsed.embedding)
    }

    async fn pull(
        &self,
        name: &str,
        tx: mpsc::Sender<PullProgress>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let url = format!("{}/api/pull", self.base_url);
        let body = serde_json::json!({ "name": name, "stream": true });

        let resp = Self::streaming_client()
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(RuntimeError::from_transport)?;
        let resp = Self::check_status(resp).await?;

        process_pull_stream(resp, tx, cancel).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.base_url);
        let body = serde_json::json!({ "name": name });

        let resp = self
            .client
            .delete(&url)
            .json(&body)
            .send()
            .await
            .map_err(RuntimeError::from_transport)?;

        if resp.status().as_u16() == 404 {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let resp = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(RuntimeError::from_transport)?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

/// Drive a newline-delimited JSON chat stream into `TokenEvent`s.
/// Each line is a JSON object; the final one has `done: true` and carries the
/// token counts. Exactly one terminal event is sent on every path.
async fn process_chat_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<TokenEvent>,
    cancel: CancellationToken,
) {
    use futures_util::StreamExt;

    let mut stats = GenerateStats::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tx.send(TokenEvent::Error { message: "generation cancelled".to_string() }).await;
                return;
            }
            c = byte_stream.next() => c,
        };

        let chunk = match chunk {
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                let _ = tx
                    .send(TokenEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
            None => break,
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<ChatStreamChunk>(line) {
                Ok(chunk_data) => {
                    if chunk_data.done {
                        let prompt_tokens = chunk_data.prompt_eval_count.unwrap_or(0);
                        let eval_tokens = chunk_data.eval_count.unwrap_or(0);
                        stats = GenerateStats {
                            prompt_tokens,
                            eval_tokens,
                            total_tokens: prompt_tokens + eval_tokens,
                        };
                    } else {
                        let text = chunk_data.message.content;
                        if !text.is_empty()
                            && tx.send(TokenEvent::Token { text }).await.is_err()
                        {
                            return; // receiver dropped
                        }
                    }
                }
                Err(e) => {
                    warn!(line, err = %e, "failed to parse chat stream chunk");
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx.send(TokenEvent::Done { stats }).await;
}

/// Drive a newline-delimited JSON pull stream into `PullProgress` events.
async fn process_pull_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<PullProgress>,
    cancel: CancellationToken,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();
    let mut saw_success = false;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            c = byte_stream.next() => c,
        };

        let chunk = match chunk {
            Some(Ok(c)) => c,
            Some(Err(e)) => return Err(RuntimeError::Unavailable(e.to_string())),
            None => break,
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<PullStreamChunk>(line) {
                Ok(chunk_data) => {
                    if let Some(err) = chunk_data.error {
                        return Err(RuntimeError::Api {
                            status: 0,
                            message: err,
                        });
                    }
                    if chunk_data.status == "success" {
                        saw_success = true;
                    }
                    let event = PullProgress {
                        status: chunk_data.status,
                        completed: chunk_data.completed.unwrap_or(0),
                        total: chunk_data.total.unwrap_or(0),
                    };
                    if tx.send(event).await.is_err() {
                        return Err(RuntimeError::Cancelled);
                    }
                }
                Err(e) => {
                    warn!(line, err = %e, "failed to parse pull stream chunk");
                }
            }
        }

        line_buf = remainder;
    }

    if saw_success {
        Ok(())
    } else {
        Err(RuntimeError::Api {
            status: 0,
            message: "pull stream ended without success status".to_string(),
        })
    }
}

// Wire types (deserialization only)

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    size: u64,
    details: Option<TagDetails>,
}

#[derive(Deserialize, Default)]
struct TagDetails {
    #[serde(default)]
    family: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    parameter_size: String,
    #[serde(default)]
    quantization_level: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    message: WireMessage,
    #[allow(dead_code)]
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    #[allow(dead_code)]
    #[serde(default = "assistant_role")]
    role: Role,
}

impl Default for WireMessage {
    fn default() -> Self {
        Self {
            content: String::new(),
            role: Role::Assistant,
        }
    }
}

fn assistant_role() -> Role {
    Role::Assistant
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    message: WireMessage,
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct PullStreamChunk {
    #[serde(default)]
    status: String,
    completed: Option<u64>,
    total: Option<u64>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_carries_sampling_options() {
        let req = GenerateRequest {
            model: "llama3.2:3b".to_string(),
            messages: vec![crate::client::ChatMessage::new(Role::User, "hi")],
            options: crate::client::GenerateOptions {
                max_tokens: 64,
                ..Default::default()
            },
        };
        let body = OllamaRuntime::build_chat_body(&req, true);
        assert_eq!(body["model"], "llama3.2:3b");
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn stream_chunk_parses_final_stats() {
        let line = r#"{"model":"m","message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":12,"eval_count":34}"#;
        let chunk: ChatStreamChunk = serde_json::from_str(line).unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.prompt_eval_count, Some(12));
        assert_eq!(chunk.eval_count, Some(34));
    }

    #[test]
    fn pull_chunk_tolerates_heartbeats() {
        let line = r#"{"status":"pulling manifest"}"#;
        let chunk: PullStreamChunk = serde_json::from_str(line).unwrap();
        assert_eq!(chunk.status, "pulling manifest");
        assert_eq!(chunk.completed, None);
        assert_eq!(chunk.total, None);
    }
}
