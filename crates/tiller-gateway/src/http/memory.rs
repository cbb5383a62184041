use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::Uri;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tiller_core::Error;
use tiller_memory::{NewSummary, SearchFilters, SummaryType};

use crate::app::AppState;
use crate::http::extract::CurrentUser;
use crate::http::problem::{reject, ApiError, ApiResult};

const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_GAP_THRESHOLD: &str = "30m";

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// POST /v1/memory/search. Semantic search scoped to the caller.
pub async fn search(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<Value>> {
    if req.query.trim().is_empty() {
        return Err(ApiError::new(
            Error::Validation("query is empty".into()),
            &uri,
        ));
    }
    let filters = SearchFilters {
        session_id: req.session_id,
        user_id: Some(user.id),
    };
    let results = state
        .memory
        .search(
            &req.query,
            &filters,
            req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .await
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Deserialize)]
pub struct SummariesQuery {
    pub session_id: Option<String>,
    #[serde(rename = "type")]
    pub summary_type: Option<SummaryType>,
}

/// GET /v1/memory/summaries
pub async fn list_summaries(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Query(q): Query<SummariesQuery>,
) -> ApiResult<Json<Value>> {
    if let Some(session_id) = &q.session_id {
        state
            .sessions
            .get_owned(session_id, &user.id)
            .map_err(reject(&uri))?;
    }
    let summaries = state
        .memory
        .list_summaries(q.session_id.as_deref(), q.summary_type)
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "summaries": summaries })))
}

/// POST /v1/memory/summaries
pub async fn create_summary(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewSummary>,
) -> ApiResult<Json<Value>> {
    if let Some(session_id) = &req.session_id {
        state
            .sessions
            .get_owned(session_id, &user.id)
            .map_err(reject(&uri))?;
    }
    let summary = state.memory.create_summary(req).await.map_err(reject(&uri))?;
    Ok(Json(json!({ "summary": summary })))
}

#[derive(Deserialize)]
pub struct GapsQuery {
    pub threshold: Option<String>,
}

/// GET /v1/memory/gaps/{session_id}?threshold=1m
pub async fn gaps(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Path(session_id): Path<String>,
    Query(q): Query<GapsQuery>,
) -> ApiResult<Json<Value>> {
    state
        .sessions
        .get_owned(&session_id, &user.id)
        .map_err(reject(&uri))?;

    let threshold = q.threshold.as_deref().unwrap_or(DEFAULT_GAP_THRESHOLD);
    let threshold = humantime::parse_duration(threshold)
        .ok()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .ok_or_else(|| {
            ApiError::new(
                Error::Validation(format!("bad threshold duration: {threshold}")),
                &uri,
            )
        })?;

    let gaps = state
        .memory
        .detect_gaps(&session_id, threshold)
        .map_err(reject(&uri))?;
    Ok(Json(json!({ "session_id": session_id, "gaps": gaps })))
}
