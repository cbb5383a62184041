//! RFC 7807 error responses. Every handler failure funnels through
//! `ApiError` so the wire shape is defined exactly once.

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tiller_core::{Error, Problem};

/// A handler failure plus the request path it occurred on.
pub struct ApiError {
    error: Error,
    instance: String,
}

impl ApiError {
    pub fn new(error: Error, uri: &Uri) -> Self {
        Self {
            error,
            instance: uri.path().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem = Problem::from_error(&self.error, &self.instance);
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

/// Adapter for `map_err`: converts any domain error into an `ApiError`
/// anchored at the request path.
pub fn reject<E: Into<Error>>(uri: &Uri) -> impl Fn(E) -> ApiError + '_ {
    move |e| ApiError::new(e.into(), uri)
}

/// Top-level panic recovery: log and answer with the same envelope every
/// other failure uses.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");

    let problem = Problem::from_error(&Error::Internal(detail), "");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(problem)).into_response()
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
