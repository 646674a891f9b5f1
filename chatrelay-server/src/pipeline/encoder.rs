//! Event-protocol encoder
//!
//! Turns the fragment subscription into numbered client events:
//!
//! ```text
//! Init ──► Streaming ──► AwaitingPersistence ──► Done
//!  │ id 0    │ one `message` per       │ poll store, then
//!  │ init    │ non-final fragment      │ one `complete`
//! ```
//!
//! Sequence ids start at 0 and are contiguous. The final fragment (or an
//! upstream close) produces no frame of its own; it moves the encoder to
//! `AwaitingPersistence`, where the `complete` event is held back until the
//! store confirms the record or the poll budget runs out. A decode error
//! ends the stream with that error and no `complete` event.

use std::sync::Arc;

use chatrelay_common::{poll_until, PollOutcome, PollPolicy};
use futures::Stream;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decoder::DecodeError;
use super::fanout::FragmentSubscription;
use crate::store::ChatStore;

/// Client event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Init,
    Message,
    Complete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::Message => "message",
            EventKind::Complete => "complete",
        }
    }
}

/// One event on the client channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub sequence_id: u64,
    pub kind: EventKind,
    pub payload: String,
}

impl OutputEvent {
    /// Render as event-stream text.
    ///
    /// `init` is framed as `id:` then `data:`; other kinds as `event:`,
    /// `data:`, `id:`. A payload containing line breaks (`\r\n`, `\r` or
    /// `\n`) becomes one `data:` line per line so the frame stays
    /// well-formed; clients rejoin the lines with `\n`.
    pub fn to_frame(&self) -> String {
        let mut frame = String::with_capacity(self.payload.len() + 32);
        match self.kind {
            EventKind::Init => {
                frame.push_str(&format!("id:{}\n", self.sequence_id));
                push_data_lines(&mut frame, &self.payload);
            }
            EventKind::Message | EventKind::Complete => {
                frame.push_str(&format!("event:{}\n", self.kind.as_str()));
                push_data_lines(&mut frame, &self.payload);
                frame.push_str(&format!("id:{}\n", self.sequence_id));
            }
        }
        frame.push('\n');
        frame
    }
}

fn push_data_lines(frame: &mut String, payload: &str) {
    // Event-stream readers end a line at CR, LF or CRLF
    let normalized = payload.replace("\r\n", "\n");
    for line in normalized.split(['\r', '\n']) {
        frame.push_str("data:");
        frame.push_str(line);
        frame.push('\n');
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitPayload {
    run_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletePayload {
    run_id: Uuid,
    done: bool,
    persisted: bool,
}

/// Encoder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Init,
    Streaming,
    AwaitingPersistence,
    Done,
}

pub struct EventEncoder {
    run_id: Uuid,
    store: Arc<dyn ChatStore>,
    policy: PollPolicy,
    state: EncoderState,
    next_sequence_id: u64,
}

impl EventEncoder {
    pub fn new(run_id: Uuid, store: Arc<dyn ChatStore>, policy: PollPolicy) -> Self {
        Self {
            run_id,
            store,
            policy,
            state: EncoderState::Init,
            next_sequence_id: 0,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    fn emit(&mut self, kind: EventKind, payload: String) -> OutputEvent {
        let event = OutputEvent {
            sequence_id: self.next_sequence_id,
            kind,
            payload,
        };
        self.next_sequence_id += 1;
        event
    }

    fn init_event(&mut self) -> OutputEvent {
        let payload = serde_json::to_string(&InitPayload { run_id: self.run_id })
            .unwrap_or_else(|_| format!("{{\"runId\":\"{}\"}}", self.run_id));
        self.emit(EventKind::Init, payload)
    }

    fn complete_event(&mut self, persisted: bool) -> OutputEvent {
        let payload = serde_json::to_string(&CompletePayload {
            run_id: self.run_id,
            done: true,
            persisted,
        })
        .unwrap_or_else(|_| {
            format!(
                "{{\"runId\":\"{}\",\"done\":true,\"persisted\":{}}}",
                self.run_id, persisted
            )
        });
        self.emit(EventKind::Complete, payload)
    }

    /// Poll the store until the run's record is visible or the budget is spent
    async fn confirm_persisted(&self) -> bool {
        let store = self.store.clone();
        let run_id = self.run_id;

        let outcome = poll_until("chat persistence check", &self.policy, || {
            let store = store.clone();
            async move { store.find_by_id(run_id).await }
        })
        .await;

        match outcome {
            PollOutcome::Found { attempts, .. } => {
                info!(%run_id, attempts, "Chat persistence confirmed");
                true
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(
                    %run_id,
                    attempts,
                    "Chat persistence could not be confirmed, completing stream anyway"
                );
                false
            }
        }
    }

    /// Drive the state machine over `fragments`, yielding client events
    pub fn into_stream(
        self,
        mut fragments: FragmentSubscription,
    ) -> impl Stream<Item = Result<OutputEvent, DecodeError>> + Send {
        let mut encoder = self;

        async_stream::stream! {
            let mut guard = DisconnectGuard { run_id: encoder.run_id, finished: false };

            loop {
                match encoder.state {
                    EncoderState::Init => {
                        let event = encoder.init_event();
                        encoder.state = EncoderState::Streaming;
                        yield Ok(event);
                    }
                    EncoderState::Streaming => match fragments.recv().await {
                        Some(Ok(fragment)) if fragment.is_final => {
                            debug!(run_id = %encoder.run_id, "Final fragment received");
                            encoder.state = EncoderState::AwaitingPersistence;
                        }
                        Some(Ok(fragment)) => {
                            let event = encoder.emit(EventKind::Message, fragment.text);
                            yield Ok(event);
                        }
                        Some(Err(e)) => {
                            warn!(run_id = %encoder.run_id, error = %e, "Aborting client stream");
                            encoder.state = EncoderState::Done;
                            guard.finished = true;
                            yield Err(e);
                        }
                        None => {
                            debug!(
                                run_id = %encoder.run_id,
                                "Upstream ended without final fragment"
                            );
                            encoder.state = EncoderState::AwaitingPersistence;
                        }
                    },
                    EncoderState::AwaitingPersistence => {
                        let persisted = encoder.confirm_persisted().await;
                        let event = encoder.complete_event(persisted);
                        encoder.state = EncoderState::Done;
                        guard.finished = true;
                        yield Ok(event);
                    }
                    EncoderState::Done => break,
                }
            }
        }
    }
}

/// Logs when the client stream is dropped before reaching `Done`
struct DisconnectGuard {
    run_id: Uuid,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!(run_id = %self.run_id, "Client disconnected before completion");
        }
    }
}
