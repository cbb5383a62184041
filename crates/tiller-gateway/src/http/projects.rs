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
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// GET /v1/projects
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let projects = state.projects.list_for_user(&user.id).map_err(reject(&uri))?;
    Ok(Json(json!({ "projects": projects })))
}

/// POST /v1/projects
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<Json<Value>> {
    let project = state
        .projects
        .create(&user.id, &req.name, &req.description)
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "project": project })))
}

/// GET /v1/projects/{id}
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let project = state.projects.get_owned(&id, &user.id).map_err(reject(&uri))?;
    Ok(Json(json!({ "project": project })))
}

/// PUT /v1/projects/{id}
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> ApiResult<Json<Value>> {
    let project = state
        .projects
        .update(&id, &user.id, req.name.as_deref(), req.description.as_deref())
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "project": project })))
}

/// DELETE /v1/projects/{id}. Sessions are detached, not deleted.
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.projects.delete(&id, &user.id).map_err(reject(&uri))?;
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /v1/projects/{id}/sessions
pub async fn list_project_sessions(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.projects.get_owned(&id, &user.id).map_err(reject(&uri))?;
    let sessions = state.sessions.list_for_project(&id).map_err(reject(&uri))?;
    Ok(Json(json!({ "sessions": sessions })))
}
