use std::sync::Arc;

use axum::extract::State;
use axum::http::Uri;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app::AppState;
use crate::http::extract::CurrentUser;
use crate::http::problem::{reject, ApiResult};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<Value>> {
    let user = state
        .auth
        .register(&req.username, &req.email, &req.password)
        .map_err(reject(&uri))?;
    info!(user_id = %user.id, "registered");
    Ok(Json(json!({ "user": user })))
}

/// POST /v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let (user, token) = state
        .auth
        .login(&req.email, &req.password)
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "user": user, "token": token })))
}

/// POST /v1/auth/logout. Revokes the presented token.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    _user: CurrentUser,
    headers: axum::http::HeaderMap,
) -> ApiResult<Json<Value>> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        state.auth.logout(token).map_err(reject(&uri))?;
    }
    Ok(Json(json!({ "status": "ok" })))
}
