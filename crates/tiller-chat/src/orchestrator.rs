use std::sync::Arc;
use std::time::Duration;

use tiller_core::config::{CHAT_DEADLINE_SECS, PERSIST_GRACE_SECS};
use tiller_core::Role;
use tiller_memory::{SearchFilters, SemanticMemory};
use tiller_models::{ModelConfig, ModelManager, ModelRecord, ModelStatus};
use tiller_runtime::{
    GenerateOptions, GenerateRequest, GenerateStats, RuntimeClient, TokenEvent,
};
use tiller_sessions::SessionStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::context;
use crate::error::{ChatError, Result};
use crate::types::{
    ChatEvent, ChatOptions, ChatOutcome, ChatReply, ChatRequest, DoneMetadata,
};

/// Retrieved context items per turn.
const RETRIEVAL_LIMIT: usize = 5;
/// Recent-history window handed to the prompt builder (further trimmed by
/// the model's context budget).
const RECENT_LIMIT: usize = 20;

/// Composes one chat turn end-to-end: model resolution, session ensure,
/// retrieval, prompt assembly, generation, persistence, and async indexing.
pub struct ChatOrchestrator {
    sessions: SessionStore,
    models: Arc<ModelManager>,
    memory: Arc<SemanticMemory>,
    runtime: Arc<dyn RuntimeClient>,
}

impl ChatOrchestrator {
    pub fn new(
        sessions: SessionStore,
        models: Arc<ModelManager>,
        memory: Arc<SemanticMemory>,
        runtime: Arc<dyn RuntimeClient>,
    ) -> Self {
        Self {
            sessions,
            models,
            memory,
            runtime,
        }
    }

    /// Run one chat turn for `user_id`. Validation, session setup, and the
    /// user-message insert happen before this returns, so callers can map
    /// failures onto HTTP statuses; generation itself runs behind the
    /// returned outcome.
    #[instrument(skip(self, req), fields(user_id, stream = req.stream))]
    pub async fn chat(&self, user_id: &str, req: ChatRequest) -> Result<ChatOutcome> {
        if req.message.trim().is_empty() {
            return Err(ChatError::Validation("message is empty".into()));
        }

        let record = self.resolve_model(req.model.as_deref())?;
        let config = self.models.get_config(&record.id)?;
        let options = merge_options(&config, req.options.as_ref());
        let session = self
            .sessions
            .ensure(user_id, req.session_id.as_deref(), &req.message)?;

        // Retrieval is ancillary: a cold memory subsystem must not block the
        // turn.
        let filters = SearchFilters {
            user_id: Some(user_id.to_string()),
            session_id: None,
        };
        let retrieved = match self.memory.search(&req.message, &filters, RETRIEVAL_LIMIT).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "context retrieval skipped");
                Vec::new()
            }
        };

        let recent = self.sessions.recent_messages(&session.id, RECENT_LIMIT)?;
        let messages = context::build_messages(
            &config.system_prompt,
            &recent,
            &retrieved,
            &req.message,
            config.context_length,
        );

        // The user turn is durable before generation starts.
        let user_msg = self
            .sessions
            .add_message(&session.id, Role::User, &req.message, None, None)?;

        let gen_req = GenerateRequest {
            model: record.name.clone(),
            messages,
            options,
        };
        let cancel = request_deadline_token();

        if req.stream {
            let (out_tx, out_rx) = mpsc::channel::<ChatEvent>(64);
            let session_id = session.id.clone();
            let worker = StreamWorker {
                sessions: self.sessions.clone(),
                models: self.models.clone(),
                memory: self.memory.clone(),
                runtime: self.runtime.clone(),
                session_id: session.id.clone(),
                user_msg_id: user_msg.id,
                user_text: req.message.clone(),
                model_name: record.name.clone(),
                gen_req,
                cancel,
            };
            tokio::spawn(worker.run(out_tx));
            Ok(ChatOutcome::Stream {
                session_id,
                events: out_rx,
            })
        } else {
            let outcome = self
                .chat_blocking(session.id, user_msg.id, &req.message, record, gen_req, &cancel)
                .await;
            cancel.cancel();
            outcome
        }
    }

    async fn chat_blocking(
        &self,
        session_id: String,
        user_msg_id: String,
        user_text: &str,
        record: ModelRecord,
        gen_req: GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome> {
        let reply = match self.runtime.generate(&gen_req, cancel).await {
            Ok(r) => r,
            // One retry with a fresh connection, since nothing streamed yet.
            Err(e) if e.is_transient() => {
                debug!(error = %e, "transient generate failure; retrying once");
                self.runtime.generate(&gen_req, cancel).await?
            }
            Err(e) => return Err(e.into()),
        };

        let assistant_msg = self.sessions.add_message(
            &session_id,
            Role::Assistant,
            &reply.content,
            Some(&record.name),
            Some(reply.stats.total_tokens),
        )?;

        spawn_indexing(
            self.memory.clone(),
            vec![
                (user_msg_id, user_text.to_string()),
                (assistant_msg.id, reply.content.clone()),
            ],
        );

        self.models.mark_used(&record.name);
        info!(session_id = %session_id, tokens = reply.stats.total_tokens, "chat turn complete");

        Ok(ChatOutcome::Reply(ChatReply {
            session_id,
            reply: reply.content,
            model: reply.model,
            total_tokens: reply.stats.total_tokens,
            prompt_tokens: reply.stats.prompt_tokens,
            eval_tokens: reply.stats.eval_tokens,
        }))
    }

    fn resolve_model(&self, requested: Option<&str>) -> Result<ModelRecord> {
        let record = match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => self
                .models
                .get_by_name(name)?
                .ok_or_else(|| ChatError::Validation(format!("unknown model: {name}")))?,
            None => self
                .models
                .default_model()?
                .ok_or_else(|| ChatError::Validation("no default model configured".into()))?,
        };

        if record.status != ModelStatus::Available || !record.is_enabled {
            return Err(ChatError::Validation(format!(
                "model {} is not available for chat (status {}, enabled {})",
                record.name, record.status, record.is_enabled
            )));
        }
        Ok(record)
    }
}

/// Everything the detached streaming task needs. The task owns its clones;
/// a client disconnect drops the SSE stream, not this worker.
struct StreamWorker {
    sessions: SessionStore,
    models: Arc<ModelManager>,
    memory: Arc<SemanticMemory>,
    runtime: Arc<dyn RuntimeClient>,
    session_id: String,
    user_msg_id: String,
    user_text: String,
    model_name: String,
    gen_req: GenerateRequest,
    cancel: CancellationToken,
}

enum StreamEnd {
    Done(GenerateStats),
    Failed { message: String, transient: bool },
}

impl StreamWorker {
    async fn run(self, out_tx: mpsc::Sender<ChatEvent>) {
        let mut assistant_text = String::new();
        let mut client_gone = false;

        let mut end = self
            .drive_once(&out_tx, &mut assistant_text, &mut client_gone)
            .await;

        // One retry with a fresh connection, but only if nothing streamed.
        if let StreamEnd::Failed { transient: true, .. } = &end {
            if assistant_text.is_empty() && !client_gone && !self.cancel.is_cancelled() {
                debug!("transient stream failure; retrying once");
                end = self
                    .drive_once(&out_tx, &mut assistant_text, &mut client_gone)
                    .await;
            }
        }

        match end {
            StreamEnd::Done(stats) => {
                // Persist before the terminal event so a client that sees
                // `done` can immediately read both rows back.
                let persisted = self
                    .persist_assistant(&assistant_text, Some(stats.total_tokens))
                    .await;
                if !client_gone {
                    let _ = out_tx
                        .send(ChatEvent::Done {
                            metadata: DoneMetadata::from((self.model_name.as_str(), stats)),
                        })
                        .await;
                }
                if let Some(assistant_id) = persisted {
                    spawn_indexing(
                        self.memory.clone(),
                        vec![
                            (self.user_msg_id.clone(), self.user_text.clone()),
                            (assistant_id, assistant_text.clone()),
                        ],
                    );
                }
                self.models.mark_used(&self.model_name);
                info!(session_id = %self.session_id, tokens = stats.total_tokens, "stream complete");
            }
            StreamEnd::Failed { message, .. } => {
                // A disconnected client still gets its partial turn saved;
                // a runtime failure does not fabricate an assistant row.
                if client_gone && !assistant_text.is_empty() {
                    self.persist_assistant(&assistant_text, None).await;
                } else if !client_gone {
                    let _ = out_tx.send(ChatEvent::Error { message }).await;
                }
                spawn_indexing(
                    self.memory.clone(),
                    vec![(self.user_msg_id.clone(), self.user_text.clone())],
                );
            }
        }
        self.cancel.cancel();
    }

    async fn drive_once(
        &self,
        out_tx: &mpsc::Sender<ChatEvent>,
        assistant_text: &mut String,
        client_gone: &mut bool,
    ) -> StreamEnd {
        let (rt_tx, mut rt_rx) = mpsc::channel::<TokenEvent>(64);
        let driver = {
            let runtime = self.runtime.clone();
            let req = self.gen_req.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { runtime.generate_stream(&req, rt_tx, cancel).await })
        };

        while let Some(event) = rt_rx.recv().await {
            match event {
                TokenEvent::Token { text } => {
                    assistant_text.push_str(&text);
                    if !*client_gone
                        && out_tx
                            .send(ChatEvent::Token { content: text })
                            .await
                            .is_err()
                    {
                        // Client hung up: stop the runtime read best-effort,
                        // keep what we have for persistence.
                        debug!("client disconnected mid-stream");
                        *client_gone = true;
                        self.cancel.cancel();
                    }
                }
                TokenEvent::Done { stats } => return StreamEnd::Done(stats),
                TokenEvent::Error { message } => {
                    return StreamEnd::Failed {
                        message,
                        transient: true,
                    };
                }
            }
        }

        match driver.await {
            Ok(Ok(())) => StreamEnd::Failed {
                message: "stream ended without a terminal event".to_string(),
                transient: false,
            },
            Ok(Err(e)) => StreamEnd::Failed {
                transient: e.is_transient(),
                message: e.to_string(),
            },
            Err(e) => StreamEnd::Failed {
                message: format!("stream driver panicked: {e}"),
                transient: false,
            },
        }
    }

    /// Terminal persistence runs under its own grace window, detached from
    /// the (possibly cancelled) request.
    async fn persist_assistant(&self, text: &str, tokens: Option<u32>) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        let sessions = self.sessions.clone();
        let session_id = self.session_id.clone();
        let model_name = self.model_name.clone();
        let text = text.to_string();

        let persisted = tokio::time::timeout(
            Duration::from_secs(PERSIST_GRACE_SECS),
            tokio::task::spawn_blocking(move || {
                sessions.add_message(
                    &session_id,
                    Role::Assistant,
                    &text,
                    Some(&model_name),
                    tokens,
                )
            }),
        )
        .await;

        match persisted {
            Ok(Ok(Ok(message))) => Some(message.id),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "assistant persistence failed");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "assistant persistence task failed");
                None
            }
            Err(_) => {
                warn!("assistant persistence timed out in grace window");
                None
            }
        }
    }
}

/// Index messages in the background; failures are logged, never surfaced.
fn spawn_indexing(memory: Arc<SemanticMemory>, items: Vec<(String, String)>) {
    tokio::spawn(async move {
        for (message_id, text) in items {
            if text.is_empty() {
                continue;
            }
            if let Err(e) = memory.index(&message_id, &text).await {
                warn!(message_id = %message_id, error = %e, "message indexing skipped");
            }
        }
    });
}

/// Request-scoped cancellation with the global chat ceiling attached.
fn request_deadline_token() -> CancellationToken {
    let token = CancellationToken::new();
    let watchdog = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(CHAT_DEADLINE_SECS)) => watchdog.cancel(),
            _ = watchdog.cancelled() => {}
        }
    });
    token
}

pub(crate) fn merge_options(config: &ModelConfig, overrides: Option<&ChatOptions>) -> GenerateOptions {
    let mut options = GenerateOptions {
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        repeat_penalty: config.repeat_penalty,
        context_length: config.context_length,
        max_tokens: config.max_tokens,
    };
    if let Some(o) = overrides {
        if let Some(v) = o.temperature {
            options.temperature = v;
        }
        if let Some(v) = o.top_p {
            options.top_p = v;
        }
        if let Some(v) = o.top_k {
            options.top_k = v;
        }
        if let Some(v) = o.repeat_penalty {
            options.repeat_penalty = v;
        }
        if let Some(v) = o.max_tokens {
            options.max_tokens = v;
        }
    }
    options
}


#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tiller_memory::EmbeddingService;
    use tiller_runtime::{
        AvailableModelsSource, GenerateReply, ModelDescriptor, PullProgress, RuntimeError,
    };
    use tiller_store::Store;

    /// Chat runtime with a scripted token stream and programmable failures.
    struct ScriptedChat {
        tokens: Vec<&'static str>,
        /// Fail this many generate/stream calls with a 503 before working.
        fail_first: AtomicUsize,
    }

    impl ScriptedChat {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                tokens: vec!["Hel", "lo ", "there"],
                fail_first: AtomicUsize::new(0),
            })
        }

        fn failing(times: usize) -> Arc<Self> {
            Arc::new(Self {
                tokens: vec!["Hel", "lo ", "there"],
                fail_first: AtomicUsize::new(times),
            })
        }

        fn take_failure(&self) -> bool {
            self.fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn stats(&self) -> GenerateStats {
            GenerateStats {
                prompt_tokens: 7,
                eval_tokens: 5,
                total_tokens: 12,
            }
        }
    }

    #[async_trait]
    impl RuntimeClient for ScriptedChat {
        async fn list_installed(&self) -> tiller_runtime::error::Result<Vec<ModelDescriptor>> {
            Ok(vec![ModelDescriptor {
                name: "m1".into(),
                size_bytes: 1000,
                family: "llama".into(),
                format: "gguf".into(),
                parameter_size: "3B".into(),
                quantization: "Q4_K_M".into(),
            }])
        }
        async fn generate(
            &self,
            _req: &GenerateRequest,
            _cancel: &CancellationToken,
        ) -> tiller_runtime::error::Result<GenerateReply> {
            if self.take_failure() {
                return Err(RuntimeError::Api {
                    status: 503,
                    message: "runtime overloaded".into(),
                });
            }
            Ok(GenerateReply {
                content: self.tokens.concat(),
                model: "m1".into(),
                stats: self.stats(),
            })
        }
        async fn generate_stream(
            &self,
            _req: &GenerateRequest,
            tx: mpsc::Sender<TokenEvent>,
            cancel: CancellationToken,
        ) -> tiller_runtime::error::Result<()> {
            if self.take_failure() {
                return Err(RuntimeError::Api {
                    status: 503,
                    message: "runtime overloaded".into(),
                });
            }
            for t in &self.tokens {
                if cancel.is_cancelled() {
                    let _ = tx
                        .send(TokenEvent::Error {
                            message: "generation cancelled".into(),
                        })
                        .await;
                    return Ok(());
                }
                let _ = tx
                    .send(TokenEvent::Token {
                        text: t.to_string(),
                    })
                    .await;
            }
            let _ = tx
                .send(TokenEvent::Done {
                    stats: self.stats(),
                })
                .await;
            Ok(())
        }
        async fn embed(&self, _model: &str, _text: &str) -> tiller_runtime::error::Result<Vec<f32>> {
            Ok(vec![0.3; 4])
        }
        async fn pull(
            &self,
            _name: &str,
            _tx: mpsc::Sender<PullProgress>,
            _cancel: CancellationToken,
        ) -> tiller_runtime::error::Result<()> {
            Ok(())
        }
        async fn delete(&self, _name: &str) -> tiller_runtime::error::Result<()> {
            Ok(())
        }
        async fn health(&self) -> tiller_runtime::error::Result<()> {
            Ok(())
        }
    }

    struct EmptySource;

    #[async_trait]
    impl AvailableModelsSource for EmptySource {
        async fn fetch(&self) -> tiller_runtime::error::Result<HashSet<String>> {
            Ok(HashSet::new())
        }
    }

    async fn fixture(runtime: Arc<ScriptedChat>) -> (ChatOrchestrator, SessionStore) {
        let store = Store::open_in_memory().unwrap();
        store.ensure_vec_tables(4).unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        for user in ["u1", "u2"] {
            store
                .lock()
                .execute(
                    "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
                     VALUES (?1, ?1, ?1 || '@x.io', 'h', ?2, ?2)",
                    rusqlite::params![user, now],
                )
                .unwrap();
        }

        let sessions = SessionStore::new(store.clone());
        let models = Arc::new(ModelManager::new(
            store.clone(),
            runtime.clone(),
            Arc::new(EmptySource),
            Duration::from_secs(3600),
        ));
        models.sync_with_runtime().await.unwrap();
        let m1 = models.get_by_name("m1").unwrap().unwrap();
        models.set_default(&m1.id).unwrap();

        let embedder = Arc::new(EmbeddingService::new(runtime.clone(), "nomic-embed-text", Some(4)));
        let memory = Arc::new(SemanticMemory::new(store, embedder));
        let orchestrator =
            ChatOrchestrator::new(sessions.clone(), models, memory, runtime);
        (orchestrator, sessions)
    }

    fn request(message: &str, stream: bool) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            session_id: None,
            model: None,
            stream,
            options: None,
        }
    }

    async fn collect_events(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn streaming_happy_path_persists_both_turns() {
        let (orchestrator, sessions) = fixture(ScriptedChat::new()).await;
        let outcome = orchestrator.chat("u1", request("hello", true)).await.unwrap();

        let ChatOutcome::Stream { session_id, events } = outcome else {
            panic!("expected stream outcome");
        };
        let events = collect_events(events).await;

        let tokens: Vec<&ChatEvent> = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::Token { .. }))
            .collect();
        assert!(!tokens.is_empty());
        assert!(matches!(events.last(), Some(ChatEvent::Done { .. })));
        // No events after the terminal one: Done is last by construction.

        let messages = sessions.list_messages(&session_id, "u1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello there");
        assert_eq!(messages[1].tokens_used, Some(12));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_streaming_returns_full_reply() {
        let (orchestrator, sessions) = fixture(ScriptedChat::new()).await;
        let outcome = orchestrator.chat("u1", request("hello", false)).await.unwrap();

        let ChatOutcome::Reply(reply) = outcome else {
            panic!("expected reply outcome");
        };
        assert_eq!(reply.reply, "Hello there");
        assert_eq!(reply.total_tokens, 12);

        let messages = sessions.list_messages(&reply.session_id, "u1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hello there");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failure_before_tokens_is_retried_once() {
        let (orchestrator, _) = fixture(ScriptedChat::failing(1)).await;
        let outcome = orchestrator.chat("u1", request("hello", true)).await.unwrap();

        let ChatOutcome::Stream { events, .. } = outcome else {
            panic!("expected stream outcome");
        };
        let events = collect_events(events).await;
        assert!(matches!(events.last(), Some(ChatEvent::Done { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn persistent_runtime_failure_ends_stream_with_error_and_no_assistant_row() {
        let (orchestrator, sessions) = fixture(ScriptedChat::failing(10)).await;
        let outcome = orchestrator.chat("u1", request("hello", true)).await.unwrap();

        let ChatOutcome::Stream { session_id, events } = outcome else {
            panic!("expected stream outcome");
        };
        let events = collect_events(events).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events.last(), Some(ChatEvent::Error { .. })));

        // The user turn is durable; no assistant row was fabricated.
        let messages = sessions.list_messages(&session_id, "u1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_streaming_runtime_failure_surfaces_as_unavailable() {
        let (orchestrator, _) = fixture(ScriptedChat::failing(10)).await;
        let err = orchestrator
            .chat("u1", request("hello", false))
            .await
            .unwrap_err();
        let core: tiller_core::Error = err.into();
        assert_eq!(core.status(), 503);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_model_is_a_validation_error() {
        let (orchestrator, _) = fixture(ScriptedChat::new()).await;
        let mut req = request("hello", false);
        req.model = Some("nope:1b".into());
        let err = orchestrator.chat("u1", req).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_message_is_rejected() {
        let (orchestrator, _) = fixture(ScriptedChat::new()).await;
        let err = orchestrator.chat("u1", request("   ", false)).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foreign_session_is_forbidden() {
        let (orchestrator, sessions) = fixture(ScriptedChat::new()).await;
        let foreign = sessions.create("u2", "bob's chat", None).unwrap();

        let mut req = request("hello", false);
        req.session_id = Some(foreign.id);
        let err = orchestrator.chat("u1", req).await.unwrap_err();
        let core: tiller_core::Error = err.into();
        assert_eq!(core.status(), 403);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_turn_reuses_the_session() {
        let (orchestrator, sessions) = fixture(ScriptedChat::new()).await;
        let first = orchestrator.chat("u1", request("hello", false)).await.unwrap();
        let ChatOutcome::Reply(first) = first else {
            panic!()
        };

        let mut req = request("and again", false);
        req.session_id = Some(first.session_id.clone());
        orchestrator.chat("u1", req).await.unwrap();

        let messages = sessions.list_messages(&first.session_id, "u1").unwrap();
        assert_eq!(messages.len(), 4);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[test]
    fn options_merge_prefers_request_overrides() {
        let config = ModelConfig {
            temperature: 0.8,
            max_tokens: 2048,
            ..Default::default()
        };
        let merged = merge_options(
            &config,
            Some(&ChatOptions {
                temperature: Some(0.1),
                ..Default::default()
            }),
        );
        assert_eq!(merged.temperature, 0.1);
        assert_eq!(merged.max_tokens, 2048);
    }
}
