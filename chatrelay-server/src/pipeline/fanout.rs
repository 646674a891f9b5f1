//! Fragment fan-out
//!
//! One pump task reads the decoded fragment stream and hands every item to
//! each subscriber through its own unbounded channel. Subscribers advance
//! independently: a slow or departed subscriber never holds back the others,
//! and each one sees every item exactly once, in decode order.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::decoder::{DecodeError, Fragment};

/// Item delivered to subscribers
pub type FragmentItem = Result<Fragment, DecodeError>;

/// Independent cursor over the fanned-out fragment sequence
#[derive(Debug)]
pub struct FragmentSubscription {
    rx: mpsc::UnboundedReceiver<FragmentItem>,
}

impl FragmentSubscription {
    /// Next item, or `None` once the source has ended
    pub async fn recv(&mut self) -> Option<FragmentItem> {
        self.rx.recv().await
    }
}

/// Single-producer, multi-subscriber fan-out of a fragment stream
#[derive(Debug, Default)]
pub struct FragmentFanout {
    senders: Vec<mpsc::UnboundedSender<FragmentItem>>,
}

impl FragmentFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; must be called before [`FragmentFanout::spawn`]
    pub fn subscribe(&mut self) -> FragmentSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        FragmentSubscription { rx }
    }

    /// Start pumping `source` to all subscribers.
    ///
    /// The task resolves to the number of items read from the source. It
    /// stops early only when every subscriber has gone away.
    pub fn spawn<S>(self, run_id: Uuid, source: S) -> JoinHandle<usize>
    where
        S: Stream<Item = FragmentItem> + Send + 'static,
    {
        tokio::spawn(self.pump(run_id, source))
    }

    async fn pump<S>(mut self, run_id: Uuid, source: S) -> usize
    where
        S: Stream<Item = FragmentItem> + Send + 'static,
    {
        let mut source = Box::pin(source);
        let mut forwarded = 0usize;

        while let Some(item) = source.next().await {
            forwarded += 1;
            let before = self.senders.len();
            self.senders.retain(|tx| tx.send(item.clone()).is_ok());

            if self.senders.len() < before {
                debug!(
                    %run_id,
                    remaining = self.senders.len(),
                    "Fragment subscriber went away"
                );
            }
            if self.senders.is_empty() {
                debug!(%run_id, "No fragment subscribers left, stopping upstream read");
                break;
            }
        }

        debug!(%run_id, forwarded, "Fragment fan-out finished");
        forwarded
    }
}
