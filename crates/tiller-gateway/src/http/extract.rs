use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tiller_core::Error;
use tiller_users::User;

use crate::app::AppState;
use crate::http::problem::ApiError;

/// The authenticated user, resolved from the `Authorization: Bearer` header.
/// Handlers that take this extractor are ownership-scoped by construction.
pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            ApiError::new(
                Error::Unauthorized("missing bearer token".into()),
                &parts.uri,
            )
        })?;
        let user = state
            .auth
            .authenticate(&token)
            .map_err(|e| ApiError::new(e.into(), &parts.uri))?;
        Ok(CurrentUser(user))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}
