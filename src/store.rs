use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Outcome of one atomic window transaction: the structured
/// `(allowed, remaining, retry_after_millis)` tuple the store returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Slots left in the window, computed after the just-accepted entry was
    /// inserted. Zero when denied.
    pub remaining: u32,
    /// How long until the oldest surviving entry leaves the window. Zero when
    /// allowed, and zero on denial of a key with no surviving entries.
    pub retry_after_millis: u64,
}

/// Backing store for sliding-window state.
///
/// The contract that matters is whole-evaluation atomicity per key:
/// [`check_and_record`](Self::check_and_record) runs expire → count →
/// conditional insert as one indivisible unit against all concurrent callers
/// of the same key, while distinct keys are never serialized against one
/// another. A check-then-act implementation (separate read, then separate
/// write) violates the contract under concurrency.
///
/// All expiry is the store's responsibility: entries and the per-key counter
/// carry a TTL equal to the window, refreshed on every accepted request, and
/// stale entries are dropped lazily when the key is next touched. Callers own
/// timeout/cancellation of the surrounding I/O; implementations make at most
/// one attempt per call.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically evaluate the window for `key` and, if under `limit`,
    /// record one unit of consumption.
    async fn check_and_record(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowDecision>;

    /// Count live entries for `key` within the current window, without
    /// expiring anything or otherwise mutating state.
    async fn window_count(&self, key: &str, window: Duration) -> Result<u64>;

    /// Drop all state for `key`, including its counter.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Probe store reachability.
    async fn health_check(&self) -> Result<()>;
}
