//! Chat endpoints
//!
//! - `POST /chats` streams a new generation as an event stream
//! - `GET /chats` lists persisted chats
//! - `GET /chats/:id` looks up one chat, optionally waiting for it to land

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chatrelay_common::{poll_until, uuid_utils};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::db::ChatRecord;
use crate::error::{ApiError, ApiResult};
use crate::upstream::GenerateRequest;
use crate::AppState;

/// Body of `POST /chats`; every field falls back to configuration
#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRequest {
    pub prompt: Option<String>,
    pub model: Option<String>,
}

/// Query of `GET /chats/:id`
#[derive(Debug, Default, Deserialize)]
pub struct LookupParams {
    /// Poll the store with the persistence policy before answering
    #[serde(default)]
    pub wait: bool,
}

/// POST /chats
///
/// Opens the upstream generation, then streams:
/// `init` (id 0), one `message` per token, and `complete` once the chat
/// is confirmed in the store (or the confirmation budget is spent).
pub async fn create_chat(
    State(state): State<AppState>,
    body: Option<Json<CreateChatRequest>>,
) -> ApiResult<Response> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let prompt = body
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.defaults.prompt.clone());
    let model = body
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.defaults.model.clone());

    let run_id = uuid_utils::generate();
    info!(%run_id, %model, prompt_len = prompt.len(), "New chat requested");

    let upstream = state
        .source
        .generate(&GenerateRequest { model, prompt })
        .await?;

    let run = state.pipeline.start(run_id, upstream);
    Ok(event_stream_response(Body::from_stream(run.frames())))
}

/// Wrap a frame body with event-stream headers (no caching, no proxy buffering)
fn event_stream_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}

/// GET /chats
pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<Vec<ChatRecord>>> {
    let chats = state.store.list().await?;
    Ok(Json(chats))
}

/// GET /chats/:id
///
/// With `?wait=true` the lookup retries with the same jittered policy the
/// stream uses before `complete`.
pub async fn get_chat(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<LookupParams>,
) -> ApiResult<Json<ChatRecord>> {
    let run_id: Uuid = uuid_utils::parse(&run_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid chat id '{}': {}", run_id, e)))?;

    let record = if params.wait {
        let store = state.store.clone();
        poll_until("chat lookup", &state.pipeline.settings().poll_policy, || {
            let store = store.clone();
            async move { store.find_by_id(run_id).await }
        })
        .await
        .into_found()
    } else {
        state.store.find_by_id(run_id).await?
    };

    record
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Chat {} not found", run_id)))
}

/// Build chat routes
pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/:id", get(get_chat))
}
