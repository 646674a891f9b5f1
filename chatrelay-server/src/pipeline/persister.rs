//! Accumulator/persister
//!
//! Drains its own fragment subscription, concatenates the text deltas and
//! writes the full text to the store exactly once when the run ends (final
//! fragment or upstream close). It never touches the client channel, so a
//! slow store write cannot delay client frames and a departed client cannot
//! prevent the save.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_common::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decoder::DecodeError;
use super::fanout::FragmentSubscription;
use crate::store::ChatStore;

/// How a persister run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Full text was written
    Saved { text_len: usize, fragments: usize },
    /// Run aborted on a decode error; nothing was written
    Aborted(DecodeError),
}

pub struct ChatPersister {
    run_id: Uuid,
    store: Arc<dyn ChatStore>,
    warmup: Duration,
}

impl ChatPersister {
    pub fn new(run_id: Uuid, store: Arc<dyn ChatStore>, warmup: Duration) -> Self {
        Self {
            run_id,
            store,
            warmup,
        }
    }

    /// Accumulate the run's text and save it.
    ///
    /// A store failure is returned to the caller; the client path learns
    /// about it only through the persistence probe.
    pub async fn run(self, mut fragments: FragmentSubscription) -> Result<PersistOutcome> {
        if !self.warmup.is_zero() {
            debug!(
                run_id = %self.run_id,
                warmup_ms = self.warmup.as_millis() as u64,
                "Persister warming up before draining"
            );
            tokio::time::sleep(self.warmup).await;
        }

        let mut text = String::new();
        let mut count = 0usize;

        while let Some(item) = fragments.recv().await {
            match item {
                Ok(fragment) => {
                    count += 1;
                    text.push_str(&fragment.text);
                    if fragment.is_final {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        run_id = %self.run_id,
                        error = %e,
                        "Run aborted, not saving partial text"
                    );
                    return Ok(PersistOutcome::Aborted(e));
                }
            }
        }

        self.store.save(self.run_id, &text).await?;
        info!(
            run_id = %self.run_id,
            text_len = text.len(),
            fragments = count,
            "Chat saved"
        );

        Ok(PersistOutcome::Saved {
            text_len: text.len(),
            fragments: count,
        })
    }
}
