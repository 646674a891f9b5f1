//! Bounded retry-poll with jittered backoff
//!
//! Repeatedly calls an idempotent probe until it reports a value or the
//! attempt budget runs out. Used to confirm that an asynchronously written
//! record has become visible in the store, both by the streaming pipeline
//! (before emitting its terminal frame) and by the lookup API (`?wait=true`).
//!
//! **Algorithm:**
//! 1. Call probe
//! 2. `Ok(Some(value))` → return `Found(value)`
//! 3. `Ok(None)` or `Err(_)` → log, and if attempts remain sleep a uniformly
//!    random delay in `[min_delay, max_delay]`, then retry
//! 4. Budget spent → return `Exhausted`
//!
//! Probe errors never abort the loop; transient store errors are expected to
//! clear on a later attempt.

use crate::{Error, Result};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Default number of probe attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lower bound of the jittered delay between attempts
pub const DEFAULT_MIN_DELAY_MS: u64 = 1000;

/// Default upper bound of the jittered delay between attempts
pub const DEFAULT_MAX_DELAY_MS: u64 = 6000;

/// Attempt budget and delay bounds for [`poll_until`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay: Duration::from_millis(DEFAULT_MIN_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl PollPolicy {
    pub fn new(max_attempts: u32, min_delay_ms: u64, max_delay_ms: u64) -> Result<Self> {
        let policy = Self {
            max_attempts,
            min_delay: Duration::from_millis(min_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies that could never probe or have an inverted delay range
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "poll policy max_attempts must be at least 1".to_string(),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(Error::Config(format!(
                "poll policy min delay ({} ms) exceeds max delay ({} ms)",
                self.min_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }
        Ok(())
    }

    /// Draw the next backoff delay uniformly from `[min_delay, max_delay]`
    pub fn next_delay(&self) -> Duration {
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        if min_ms >= max_ms {
            return self.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}

/// Result of a [`poll_until`] run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// Probe reported a value on attempt `attempts`
    Found { value: T, attempts: u32 },
    /// Every attempt came back empty or failed
    Exhausted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, PollOutcome::Found { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Found { attempts, .. } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }

    pub fn into_found(self) -> Option<T> {
        match self {
            PollOutcome::Found { value, .. } => Some(value),
            PollOutcome::Exhausted { .. } => None,
        }
    }
}

/// Poll `probe` until it yields a value or `policy.max_attempts` is reached.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "chat persistence check")
/// * `policy` - Attempt budget and jitter bounds
/// * `probe` - Async closure; `Ok(None)` and `Err(_)` both count as "not yet"
pub async fn poll_until<F, Fut, T, E>(
    operation_name: &str,
    policy: &PollPolicy,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(Some(value)) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Probe succeeded after retry"
                    );
                }
                return PollOutcome::Found { value, attempts: attempt };
            }
            Ok(None) => {
                tracing::info!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    "Probe found nothing yet"
                );
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %err,
                    "Probe failed, treating as not found"
                );
            }
        }

        if attempt < max_attempts {
            let delay = policy.next_delay();
            tracing::debug!(
                operation = operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Waiting before next probe"
            );
            tokio::time::sleep(delay).await;
        }
    }

    PollOutcome::Exhausted { attempts: max_attempts }
}
