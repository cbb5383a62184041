use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Uri;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::http::extract::CurrentUser;
use crate::http::problem::{reject, ApiResult};

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// POST /v1/sessions. Explicit creation; chat also lazy-creates sessions.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(project_id) = &req.project_id {
        state
            .projects
            .get_owned(project_id, &user.id)
            .map_err(reject(&uri))?;
    }
    let session = state
        .sessions
        .create(
            &user.id,
            req.title.as_deref().unwrap_or("New chat"),
            req.project_id.as_deref(),
        )
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "session": session })))
}

/// GET /v1/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let sessions = state.sessions.list_for_user(&user.id).map_err(reject(&uri))?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// GET /v1/sessions/{id}/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let messages = state
        .sessions
        .list_messages(&id, &user.id)
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "session_id": id, "messages": messages })))
}

#[derive(Deserialize)]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
}

/// PUT /v1/sessions/{id}
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> ApiResult<Json<Value>> {
    let session = match req.title {
        Some(title) => state
            .sessions
            .update_title(&id, &user.id, &title)
            .map_err(reject(&uri))?,
        None => state.sessions.get_owned(&id, &user.id).map_err(reject(&uri))?,
    };
    Ok(Json(json!({ "session": session })))
}

/// DELETE /v1/sessions/{id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.sessions.delete(&id, &user.id).map_err(reject(&uri))?;
    Ok(Json(json!({ "status": "ok" })))
}
