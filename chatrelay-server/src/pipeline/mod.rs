//! Streaming chat pipeline
//!
//! ```text
//! upstream bytes ─► decoder ─► fan-out ─┬─► persister ─► ChatStore::save
//!                                       └─► encoder ───► client frames
//!                                              ▲
//!                       poll ChatStore::find_by_id before `complete`
//! ```
//!
//! [`ChatPipeline::start`] owns one run: it spawns the fan-out pump and the
//! persister, and hands back the encoder's event stream for the HTTP body.
//! Dropping that stream (client gone) leaves the pump and persister running
//! so the record is still saved.

pub mod decoder;
pub mod encoder;
pub mod fanout;
pub mod persister;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_common::PollPolicy;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::store::ChatStore;
use decoder::decode_stream;
use encoder::EventEncoder;
use fanout::FragmentFanout;
use persister::{ChatPersister, PersistOutcome};

pub use decoder::{DecodeError, Fragment};
pub use encoder::{EventKind, OutputEvent};

/// Per-run tuning shared by every pipeline instance
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineSettings {
    /// Budget for confirming persistence before `complete`
    pub poll_policy: PollPolicy,
    /// Delay before the persister starts draining
    pub persist_warmup: Duration,
}

/// Builds and launches per-run pipelines
#[derive(Clone)]
pub struct ChatPipeline {
    store: Arc<dyn ChatStore>,
    settings: PipelineSettings,
}

/// One launched run
pub struct ChatRun {
    pub run_id: Uuid,
    /// Client-facing events; ends after `complete` or with a decode error
    pub events: BoxStream<'static, Result<OutputEvent, DecodeError>>,
    /// Resolves when the persister has finished (saved, aborted or failed)
    pub persisted: JoinHandle<Option<PersistOutcome>>,
}

impl ChatRun {
    /// Client events rendered as event-stream frames
    pub fn frames(self) -> impl Stream<Item = Result<String, DecodeError>> + Send {
        self.events.map(|event| event.map(|e| e.to_frame()))
    }
}

impl ChatPipeline {
    pub fn new(store: Arc<dyn ChatStore>, settings: PipelineSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Start a run over `upstream` (raw NDJSON bytes from the inference service)
    pub fn start<S, B, E>(&self, run_id: Uuid, upstream: S) -> ChatRun
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        info!(%run_id, "Starting chat pipeline");

        let mut fanout = FragmentFanout::new();
        let persist_sub = fanout.subscribe();
        let encode_sub = fanout.subscribe();
        fanout.spawn(run_id, decode_stream(upstream));

        let persister =
            ChatPersister::new(run_id, self.store.clone(), self.settings.persist_warmup);
        let persisted = tokio::spawn(async move {
            match persister.run(persist_sub).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(%run_id, error = %e, "Failed to save chat");
                    None
                }
            }
        });

        let encoder = EventEncoder::new(run_id, self.store.clone(), self.settings.poll_policy);
        let events = encoder.into_stream(encode_sub).boxed();

        ChatRun {
            run_id,
            events,
            persisted,
        }
    }
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

