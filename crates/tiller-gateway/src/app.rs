use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tiller_chat::ChatOrchestrator;
use tiller_core::TillerConfig;
use tiller_memory::{EmbeddingService, SemanticMemory};
use tiller_models::ModelManager;
use tiller_runtime::{AvailableModelsSource, RuntimeClient};
use tiller_sessions::{ProjectStore, SessionStore};
use tiller_store::Store;
use tiller_users::AuthService;
use tokio::sync::Semaphore;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
/// Every service is a value owned here; there are no process-wide singletons.
pub struct AppState {
    pub config: TillerConfig,
    pub store: Store,
    pub runtime: Arc<dyn RuntimeClient>,
    pub auth: AuthService,
    pub sessions: SessionStore,
    pub projects: ProjectStore,
    pub models: Arc<ModelManager>,
    pub memory: Arc<SemanticMemory>,
    pub chat: ChatOrchestrator,
    /// Admission control for chat turns; held for the life of a stream.
    pub chat_permits: Arc<Semaphore>,
}

impl AppState {
    /// Wire every service onto one store and one runtime client. The
    /// embedding dimension is seeded from the schema when it exists.
    pub fn new(
        config: TillerConfig,
        store: Store,
        runtime: Arc<dyn RuntimeClient>,
        models_source: Arc<dyn AvailableModelsSource>,
    ) -> anyhow::Result<Self> {
        let seed_dim = store.embedding_dim()?;
        let embedder = Arc::new(EmbeddingService::new(
            runtime.clone(),
            config.runtime.embedding_model.clone(),
            seed_dim,
        ));
        let memory = Arc::new(SemanticMemory::new(store.clone(), embedder));
        let sessions = SessionStore::new(store.clone());
        let projects = ProjectStore::new(store.clone());
        let auth = AuthService::new(store.clone());
        let models = Arc::new(ModelManager::new(
            store.clone(),
            runtime.clone(),
            models_source,
            Duration::from_secs(config.limits.available_models_ttl_hours * 3600),
        ));
        let chat = ChatOrchestrator::new(
            sessions.clone(),
            models.clone(),
            memory.clone(),
            runtime.clone(),
        );
        let chat_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_chats));

        Ok(Self {
            config,
            store,
            runtime,
            auth,
            sessions,
            projects,
            models,
            memory,
            chat,
            chat_permits,
        })
    }
}

/// Assemble the full Axum router: health probes at the root, everything
/// else under /v1. The REST surface gets a request timeout; the chat route
/// does not, since streams are bounded by their own deadline.
pub fn build_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.limits.read_timeout_secs.max(1));

    let rest = Router::new()
        .route("/auth/register", post(crate::http::auth::register))
        .route("/auth/login", post(crate::http::auth::login))
        .route("/auth/logout", post(crate::http::auth::logout))
        .route(
            "/sessions",
            get(crate::http::sessions::list_sessions).post(crate::http::sessions::create_session),
        )
        .route(
            "/sessions/{id}",
            put(crate::http::sessions::update_session).delete(crate::http::sessions::delete_session),
        )
        .route(
            "/sessions/{id}/messages",
            get(crate::http::sessions::list_messages),
        )
        .route(
            "/projects",
            get(crate::http::projects::list_projects).post(crate::http::projects::create_project),
        )
        .route(
            "/projects/{id}",
            get(crate::http::projects::get_project)
                .put(crate::http::projects::update_project)
                .delete(crate::http::projects::delete_project),
        )
        .route(
            "/projects/{id}/sessions",
            get(crate::http::projects::list_project_sessions),
        )
        .route("/models", get(crate::http::models::list_models))
        .route(
            "/models/{id}",
            put(crate::http::models::update_model).delete(crate::http::models::soft_remove),
        )
        .route("/models/{id}/hard", delete(crate::http::models::hard_remove))
        .route("/models/{id}/default", post(crate::http::models::set_default))
        .route("/models/{id}/restore", post(crate::http::models::restore))
        .route(
            "/models/{id}/config",
            get(crate::http::models::get_config).put(crate::http::models::update_config),
        )
        .route("/models/sync", post(crate::http::models::sync))
        .route("/models/download", post(crate::http::models::download))
        .route(
            "/models/{id}/download-status",
            get(crate::http::models::download_status),
        )
        .route("/models/available", get(crate::http::models::available))
        .route(
            "/models/available/refresh",
            post(crate::http::models::refresh_available),
        )
        .route("/models/cache-info", get(crate::http::models::cache_info))
        .route("/memory/search", post(crate::http::memory::search))
        .route(
            "/memory/summaries",
            get(crate::http::memory::list_summaries).post(crate::http::memory::create_summary),
        )
        .route("/memory/gaps/{session_id}", get(crate::http::memory::gaps))
        .layer(tower_http::timeout::TimeoutLayer::new(timeout));

    // Chat is mounted without the timeout layer; its 5-minute ceiling lives
    // in the orchestrator.
    let v1 = rest.route("/chat", post(crate::http::chat::chat));

    Router::new()
        .route("/health", get(crate::http::health::health))
        .route("/ready", get(crate::http::health::ready))
        .route("/live", get(crate::http::health::live))
        .nest("/v1", v1)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::catch_panic::CatchPanicLayer::custom(
            crate::http::problem::panic_response,
        ))
}
