use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock source for rate limiting calculations.
///
/// The `manual` variant lets tests pin and advance time deterministically;
/// production code uses [`TimeSource::system`].
#[derive(Clone, Debug)]
pub struct TimeSource(Inner);

#[derive(Clone, Debug)]
enum Inner {
    System,
    Manual(Arc<AtomicU64>),
}

impl TimeSource {
    /// Clock backed by `SystemTime::now()`.
    pub fn system() -> Self {
        Self(Inner::System)
    }

    /// Fixed clock starting at `start_millis` since the Unix epoch.
    pub fn manual(start_millis: u64) -> Self {
        Self(Inner::Manual(Arc::new(AtomicU64::new(start_millis))))
    }

    /// Current Unix timestamp in milliseconds.
    pub fn now_millis(&self) -> u64 {
        match &self.0 {
            Inner::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("Time went backwards")
                .as_millis() as u64,
            Inner::Manual(millis) => millis.load(Ordering::SeqCst),
        }
    }

    /// Current time as a `DateTime<Utc>`.
    pub fn utc_now(&self) -> DateTime<Utc> {
        match &self.0 {
            Inner::System => Utc::now(),
            Inner::Manual(millis) => {
                DateTime::from_timestamp_millis(millis.load(Ordering::SeqCst) as i64)
                    .unwrap_or(DateTime::UNIX_EPOCH)
            }
        }
    }

    /// Advance a manual clock by `delta`. Has no effect on the system clock.
    pub fn advance(&self, delta: Duration) {
        if let Inner::Manual(millis) = &self.0 {
            millis.fetch_add(duration_millis(delta), Ordering::SeqCst);
        }
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::system()
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
