//! chatrelay-server library
//!
//! Relays a streamed generation from the inference service to HTTP clients
//! as an event stream while persisting the full text, and only announces
//! `complete` once the stored record can be read back.

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod upstream;

use pipeline::ChatPipeline;
use store::ChatStore;
use upstream::GenerationSource;

/// Request fallbacks when a client omits them
#[derive(Debug, Clone)]
pub struct ChatDefaults {
    pub model: String,
    pub prompt: String,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub source: Arc<dyn GenerationSource>,
    pub pipeline: ChatPipeline,
    pub defaults: ChatDefaults,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Create new application state; the pipeline shares `store`
    pub fn new(
        store: Arc<dyn ChatStore>,
        source: Arc<dyn GenerationSource>,
        settings: pipeline::PipelineSettings,
        defaults: ChatDefaults,
    ) -> Self {
        Self {
            pipeline: ChatPipeline::new(store.clone(), settings),
            store,
            source,
            defaults,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::chat_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
