//! Bounded retry of read-modify-write sequences on version conflicts.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::CrdError;

/// Errors that can report an optimistic-concurrency conflict.
pub trait Conflict {
    /// Whether the failed operation should be reloaded and retried.
    fn is_conflict(&self) -> bool;
}

impl Conflict for CrdError {
    fn is_conflict(&self) -> bool {
        CrdError::is_conflict(self)
    }
}

/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// How many times, and how far apart, to retry a conflicting update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Never less than one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Multiplier applied to the delay after each retry.
    pub factor: u32,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            factor: 1,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy with the given attempt ceiling and fixed delay.
    #[must_use]
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: backoff,
            factor: 1,
            max_backoff: backoff,
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(self.factor.max(1)).min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// policy's attempt ceiling is reached.
///
/// `op` must redo the whole read-modify-write sequence on each call.
///
/// # Errors
///
/// Returns the first non-conflict error, or the last conflict once attempts
/// are exhausted.
pub async fn retry_on_conflict<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Conflict + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff.min(policy.max_backoff);
    let mut attempt = 1;

    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                debug!(attempt, max_attempts, error = %e, "Conflict, retrying");
                tokio::time::sleep(backoff).await;
                backoff = policy.next_backoff(backoff);
                attempt += 1;
            }
            result => return result,
        }
    }
}
