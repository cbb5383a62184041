use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::Uri;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tiller_models::{ModelConfigPatch, ModelPatch};

use crate::app::AppState;
use crate::http::extract::CurrentUser;
use crate::http::problem::{reject, ApiResult};

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub available: bool,
}

/// GET /v1/models?available=bool
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let models = state.models.list(q.available).map_err(reject(&uri))?;
    Ok(Json(json!({ "models": models })))
}

/// PUT /v1/models/{id}
pub async fn update_model(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<ModelPatch>,
) -> ApiResult<Json<Value>> {
    let model = state.models.update(&id, &patch).map_err(reject(&uri))?;
    Ok(Json(json!({ "model": model })))
}

/// DELETE /v1/models/{id}. Soft remove; the runtime is untouched.
pub async fn soft_remove(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let model = state.models.soft_remove(&id).map_err(reject(&uri))?;
    Ok(Json(json!({ "model": model })))
}

/// DELETE /v1/models/{id}/hard. Drops the rows and best-effort deletes in
/// the runtime.
pub async fn hard_remove(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.models.force_remove(&id).await.map_err(reject(&uri))?;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /v1/models/{id}/default
pub async fn set_default(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let model = state.models.set_default(&id).map_err(reject(&uri))?;
    Ok(Json(json!({ "model": model })))
}

/// POST /v1/models/{id}/restore
pub async fn restore(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let model = state.models.restore(&id).await.map_err(reject(&uri))?;
    Ok(Json(json!({ "model": model })))
}

/// GET /v1/models/{id}/config
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let config = state.models.get_config(&id).map_err(reject(&uri))?;
    Ok(Json(json!({ "config": config })))
}

/// PUT /v1/models/{id}/config
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<ModelConfigPatch>,
) -> ApiResult<Json<Value>> {
    let config = state
        .models
        .update_config(&id, &patch)
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "config": config })))
}

/// POST /v1/models/sync. Reconciles the catalog with the runtime.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let (models, soft_error) = state
        .models
        .sync_with_runtime()
        .await
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "models": models, "runtime_error": soft_error })))
}

#[derive(Deserialize)]
pub struct DownloadRequest {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

/// POST /v1/models/download
pub async fn download(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Json(req): Json<DownloadRequest>,
) -> ApiResult<Json<Value>> {
    let model = state
        .models
        .request_download(
            &req.name,
            req.display_name.as_deref(),
            req.description.as_deref(),
        )
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "model": model })))
}

/// GET /v1/models/{id}/download-status
pub async fn download_status(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = state.models.download_status(&id).map_err(reject(&uri))?;
    Ok(Json(serde_json::to_value(status).unwrap_or_default()))
}

/// GET /v1/models/available
pub async fn available(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let models = state
        .models
        .available_models(false)
        .await
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "models": models })))
}

/// POST /v1/models/available/refresh
pub async fn refresh_available(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let models = state
        .models
        .available_models(true)
        .await
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "total": models.len(), "models": models })))
}

/// GET /v1/models/cache-info
pub async fn cache_info(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Json<Value> {
    let info = state.models.cache_info().await;
    Json(serde_json::to_value(info).unwrap_or_default())
}
