//! POST /v1/chat: the one chat endpoint, JSON or SSE depending on
//! `stream`.
//!
//! SSE framing: every frame is `data: <json>\n\n` with `type` one of
//! `token`, `done`, `error`. A stream carries zero or more `token` frames
//! followed by exactly one terminal frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tiller_chat::{ChatEvent, ChatOutcome, ChatRequest};
use tiller_core::Error;
use tracing::info;

use crate::app::AppState;
use crate::http::extract::CurrentUser;
use crate::http::problem::{reject, ApiError, ApiResult};

pub async fn chat(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Response> {
    // Admission control; the permit rides along for the stream's lifetime.
    let permit = state
        .chat_permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::new(Error::Internal("chat limiter closed".into()), &uri))?;

    info!(user_id = %user.id, stream = req.stream, "chat turn");

    match state.chat.chat(&user.id, req).await.map_err(reject(&uri))? {
        ChatOutcome::Reply(reply) => Ok(Json(reply).into_response()),
        ChatOutcome::Stream {
            session_id,
            mut events,
        } => {
            let stream = async_stream::stream! {
                let _permit = permit;
                while let Some(event) = events.recv().await {
                    let payload = match event {
                        ChatEvent::Token { content } => json!({
                            "type": "token",
                            "content": content,
                            "session_id": session_id,
                        }),
                        ChatEvent::Done { metadata } => json!({
                            "type": "done",
                            "session_id": session_id,
                            "metadata": metadata,
                        }),
                        ChatEvent::Error { message } => json!({
                            "type": "error",
                            "error": message,
                        }),
                    };
                    yield Ok::<_, Infallible>(Event::default().data(payload.to_string()));
                }
            };

            let sse = Sse::new(stream).keep_alive(KeepAlive::default());
            Ok((
                [
                    (header::CACHE_CONTROL, "no-cache"),
                    (header::CONNECTION, "keep-alive"),
                ],
                sse,
            )
                .into_response())
        }
    }
}
