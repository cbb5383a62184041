use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health: server metadata plus a runtime probe.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let runtime = match state.runtime.health().await {
        Ok(()) => "ok",
        Err(_) => "unreachable",
    };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "runtime": runtime,
        "active_downloads": state.models.active_downloads(),
        "embedding_model": state.config.runtime.embedding_model,
    }))
}

/// GET /ready: 503 until both the store and the runtime answer.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let store_ok = state
        .store
        .lock()
        .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
        .is_ok();
    let runtime_ok = state.runtime.health().await.is_ok();

    let ready = store_ok && runtime_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "store": store_ok,
            "runtime": runtime_ok,
        })),
    )
}

/// GET /live: process liveness only.
pub async fn live() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}
