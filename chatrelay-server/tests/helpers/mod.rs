//! Test Helper Utilities
//!
//! Shared fakes for chatrelay-server integration tests:
//! - `RecordingStore`: in-memory `ChatStore` that counts and logs calls
//! - `ScriptedSource`: `GenerationSource` replaying canned NDJSON
//! - `parse_frames`: minimal event-stream parser

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_common::{Error, PollPolicy, Result};
use chatrelay_server::db::ChatRecord;
use chatrelay_server::store::ChatStore;
use chatrelay_server::upstream::{ByteStream, GenerateRequest, GenerationSource, UpstreamError};
use chrono::Utc;
use futures::{stream, Stream, StreamExt};
use uuid::Uuid;

/// Short jittered policy so tests do not wait seconds per probe
pub fn fast_policy(max_attempts: u32) -> PollPolicy {
    PollPolicy::new(max_attempts, 1, 3).unwrap()
}

/// One NDJSON line of an Ollama generate response
pub fn ndjson_line(text: &str, done: bool) -> String {
    format!(
        "{}\n",
        serde_json::json!({ "model": "llama3", "response": text, "done": done })
    )
}

/// Upstream body stream from literal chunks
pub fn byte_chunks(
    chunks: Vec<String>,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
}

/// Upstream body stream pausing `delay` before each chunk
pub fn slow_byte_chunks(
    chunks: Vec<String>,
    delay: Duration,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    byte_chunks(chunks).then(move |chunk| async move {
        tokio::time::sleep(delay).await;
        chunk
    })
}

/// In-memory store that records every call
#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<HashMap<Uuid, ChatRecord>>,
    log: Mutex<Vec<String>>,
    saves: AtomicUsize,
    finds: AtomicUsize,
    /// When set, lookups never see saved records
    hide_records: AtomicBool,
    /// When set, every save returns an error and stores nothing
    fail_saves: AtomicBool,
    /// When set, every lookup returns an error
    fail_finds: AtomicBool,
    save_delay: Mutex<Duration>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose lookups always miss
    pub fn hiding() -> Self {
        let store = Self::default();
        store.hide_records.store(true, Ordering::SeqCst);
        store
    }

    /// Store whose writes always fail
    pub fn failing_saves() -> Self {
        let store = Self::default();
        store.fail_saves.store(true, Ordering::SeqCst);
        store
    }

    /// Store whose lookups always fail
    pub fn failing_finds() -> Self {
        let store = Self::default();
        store.fail_finds.store(true, Ordering::SeqCst);
        store
    }

    /// Store whose saves take `delay` to land
    pub fn with_save_delay(delay: Duration) -> Self {
        let store = Self::default();
        *store.save_delay.lock().unwrap() = delay;
        store
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// Call log entries: `save`, `save:failed`, `find:hit`, `find:miss`,
    /// `find:failed`
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn stored_text(&self, run_id: Uuid) -> Option<String> {
        self.records
            .lock()
            .unwrap()
            .get(&run_id)
            .map(|r| r.response.clone())
    }
}

#[async_trait]
impl ChatStore for RecordingStore {
    async fn save(&self, run_id: Uuid, response: &str) -> Result<()> {
        let delay = *self.save_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            self.log.lock().unwrap().push("save:failed".to_string());
            return Err(Error::Internal("disk I/O error".to_string()));
        }
        // Log under the records lock so the log order matches visibility
        let mut records = self.records.lock().unwrap();
        records.insert(
            run_id,
            ChatRecord {
                run_id,
                response: response.to_string(),
                created_at: Utc::now(),
            },
        );
        self.log.lock().unwrap().push("save".to_string());
        Ok(())
    }

    async fn find_by_id(&self, run_id: Uuid) -> Result<Option<ChatRecord>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.fail_finds.load(Ordering::SeqCst) {
            self.log.lock().unwrap().push("find:failed".to_string());
            return Err(Error::Internal("database is locked".to_string()));
        }
        let records = self.records.lock().unwrap();
        let found = if self.hide_records.load(Ordering::SeqCst) {
            None
        } else {
            records.get(&run_id).cloned()
        };
        let entry = if found.is_some() { "find:hit" } else { "find:miss" };
        self.log.lock().unwrap().push(entry.to_string());
        Ok(found)
    }

    async fn list(&self) -> Result<Vec<ChatRecord>> {
        let mut records: Vec<ChatRecord> =
            self.records.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

/// Generation source replaying fixed chunks, or refusing with a status
pub struct ScriptedSource {
    chunks: Vec<String>,
    refuse_with: Option<u16>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedSource {
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            chunks,
            refuse_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Source answering every request with `status`
    pub fn refusing(status: u16) -> Self {
        Self {
            chunks: Vec::new(),
            refuse_with: Some(status),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationSource for ScriptedSource {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<ByteStream, UpstreamError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(status) = self.refuse_with {
            return Err(UpstreamError::Status {
                status,
                body: "model not loaded".to_string(),
            });
        }
        let chunks = self.chunks.clone();
        Ok(stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed())
    }
}

/// One parsed event-stream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub data: String,
}

/// Split an event-stream body into frames
pub fn parse_frames(body: &str) -> Vec<Frame> {
    body.split("\n\n")
        .filter(|block| !block.is_empty())
        .map(|block| {
            let mut frame = Frame {
                id: None,
                event: None,
                data: String::new(),
            };
            let mut data_lines = Vec::new();
            for line in block.lines() {
                if let Some(id) = line.strip_prefix("id:") {
                    frame.id = Some(id.parse().unwrap());
                } else if let Some(event) = line.strip_prefix("event:") {
                    frame.event = Some(event.to_string());
                } else if let Some(data) = line.strip_prefix("data:") {
                    data_lines.push(data);
                }
            }
            frame.data = data_lines.join("\n");
            frame
        })
        .collect()
}

/// Run id carried by an `init` frame
pub fn init_run_id(frame: &Frame) -> Uuid {
    let payload: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
    payload["runId"].as_str().unwrap().parse().unwrap()
}
