use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{
    config::ScopeRegistry,
    error::Result,
    key::{storage_key, ClientId},
    metrics::Metrics,
    store::WindowStore,
    utils::TimeSource,
};

/// Default prefix for all rate limit keys in the store.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

/// Outcome of an admission check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// The limit that applied to this check.
    pub limit: u32,
    /// Slots left in the window after this check.
    pub remaining: u32,
    /// When the window observed by this check has fully moved past.
    pub reset_at: DateTime<Utc>,
    /// How long to wait before retrying. Zero when allowed.
    pub retry_after: Duration,
}

/// Read-only usage snapshot for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub key: String,
    pub count: u64,
    pub limit: u32,
    pub remaining: u32,
    pub window: Duration,
}

/// Sliding-window rate limiter.
///
/// Resolves the scope's config, builds the storage key, and delegates the
/// whole evaluation to one atomic store transaction. The limiter itself is
/// stateless between calls: no count caches, no timers, no background
/// expiry — idle keys evaporate through the store's TTL.
pub struct SlidingWindowLimiter {
    store: Arc<dyn WindowStore>,
    scopes: ScopeRegistry,
    key_prefix: String,
    clock: TimeSource,
    metrics: Option<Arc<Metrics>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter over the given store and scope registry.
    pub fn new(store: Arc<dyn WindowStore>, scopes: ScopeRegistry) -> Self {
        Self {
            store,
            scopes,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            clock: TimeSource::system(),
            metrics: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_time_source(mut self, clock: TimeSource) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Check and, if admitted, record one request for (scope, client).
    ///
    /// Exactly one store attempt; errors are returned as-is so the caller
    /// can apply its [`FailurePolicy`](crate::config::FailurePolicy).
    pub async fn allow(&self, scope: &str, client: &ClientId) -> Result<RateLimitDecision> {
        let config = self.scopes.resolve(scope);
        let key = storage_key(&self.key_prefix, scope, client);

        let timer = self.metrics.as_ref().map(|m| m.start_decision_timer());
        let decision = match self
            .store
            .check_and_record(&key, config.limit(), config.window())
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_store_error();
                }
                return Err(e);
            }
        };
        drop(timer);

        if let Some(metrics) = &self.metrics {
            if decision.allowed {
                metrics.record_allowed(scope);
            } else {
                metrics.record_denied(scope);
            }
        }

        if !decision.allowed {
            debug!(key = %key, scope = scope, "rate limit exceeded");
        }

        Ok(RateLimitDecision {
            allowed: decision.allowed,
            limit: config.limit(),
            remaining: decision.remaining,
            reset_at: self.clock.utc_now()
                + chrono::Duration::milliseconds(config.window_millis() as i64),
            retry_after: Duration::from_millis(decision.retry_after_millis),
        })
    }

    /// Read-only usage for (scope, client); never mutates limiter state.
    pub async fn stats(&self, scope: &str, client: &ClientId) -> Result<UsageStats> {
        let config = self.scopes.resolve(scope);
        let key = storage_key(&self.key_prefix, scope, client);

        let count = self.store.window_count(&key, config.window()).await?;
        let remaining = u64::from(config.limit()).saturating_sub(count) as u32;

        Ok(UsageStats {
            key,
            count,
            limit: config.limit(),
            remaining,
            window: config.window(),
        })
    }

    /// Clear all recorded state for (scope, client). Administrative; the
    /// engine never calls this itself.
    pub async fn reset(&self, scope: &str, client: &ClientId) -> Result<()> {
        let key = storage_key(&self.key_prefix, scope, client);
        self.store.remove(&key).await
    }

    /// Probe the backing store.
    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}
