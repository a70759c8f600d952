use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::store::{WindowDecision, WindowStore};
use crate::utils::{duration_millis, TimeSource};

/// In-process [`WindowStore`] for single-instance deployments and tests.
///
/// Each key owns a mutex guarding an ordered map of `(timestamp, seq)`
/// entries plus its disambiguation counter; holding that mutex for the whole
/// evaluation gives the same per-key atomicity the Redis script provides.
/// The outer map lock is only held long enough to fetch or create the
/// per-key state, never across a transaction, so distinct keys proceed
/// concurrently. TTL is emulated by a lazy-eviction check on every access.
pub struct MemoryWindowStore {
    clock: TimeSource,
    keys: Mutex<HashMap<String, Arc<Mutex<KeyState>>>>,
}

#[derive(Default)]
struct KeyState {
    /// Admitted entries, ordered by `(timestamp_millis, seq)`.
    entries: BTreeMap<(u64, u64), ()>,
    /// Disambiguator for entries sharing a timestamp. Shares the key's expiry.
    counter: u64,
    /// Instant (millis) at which the whole key evaporates; 0 = never written.
    expires_at: u64,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::with_time_source(TimeSource::system())
    }

    pub fn with_time_source(clock: TimeSource) -> Self {
        Self {
            clock,
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn state_for(&self, key: &str) -> Arc<Mutex<KeyState>> {
        let mut keys = self.keys.lock().unwrap();
        keys.entry(key.to_string()).or_default().clone()
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn check_and_record(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowDecision> {
        let state = self.state_for(key);
        let mut state = state.lock().unwrap();

        // Single-coordinator clock read, inside the critical section.
        let now = self.clock.now_millis();
        let window_ms = duration_millis(window);

        if state.expires_at != 0 && now >= state.expires_at {
            state.entries.clear();
            state.counter = 0;
        }

        // Same inclusive bound as ZREMRANGEBYSCORE -inf window_start.
        let window_start = now.saturating_sub(window_ms);
        state.entries = state.entries.split_off(&(window_start + 1, 0));

        let count = state.entries.len() as u64;
        if count < u64::from(limit) {
            state.counter += 1;
            let seq = state.counter;
            state.entries.insert((now, seq), ());
            state.expires_at = now + window_ms;
            Ok(WindowDecision {
                allowed: true,
                remaining: (u64::from(limit) - count - 1) as u32,
                retry_after_millis: 0,
            })
        } else {
            let retry_after_millis = state
                .entries
                .keys()
                .next()
                .map(|&(oldest, _)| (oldest + window_ms).saturating_sub(now))
                .unwrap_or(0);
            Ok(WindowDecision {
                allowed: false,
                remaining: 0,
                retry_after_millis,
            })
        }
    }

    async fn window_count(&self, key: &str, window: Duration) -> Result<u64> {
        let state = {
            let keys = self.keys.lock().unwrap();
            match keys.get(key) {
                Some(state) => state.clone(),
                None => return Ok(0),
            }
        };
        let state = state.lock().unwrap();

        let now = self.clock.now_millis();
        if state.expires_at != 0 && now >= state.expires_at {
            return Ok(0);
        }

        let window_start = now.saturating_sub(duration_millis(window));
        Ok(state.entries.range((window_start, 0)..).count() as u64)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.keys.lock().unwrap().remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
