use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for the rate limit engine
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    allowed_requests: CounterVec,
    denied_requests: CounterVec,
    store_errors: Counter,
    decision_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let allowed_requests = CounterVec::new(
            Opts::new(
                "ratelimit_allowed_requests",
                "Number of admission checks that were allowed",
            ),
            &["scope"],
        )?;

        let denied_requests = CounterVec::new(
            Opts::new(
                "ratelimit_denied_requests",
                "Number of admission checks that were denied",
            ),
            &["scope"],
        )?;

        let store_errors = Counter::new(
            "ratelimit_store_errors",
            "Number of admission checks that failed against the backing store",
        )?;

        let decision_duration = Histogram::with_opts(HistogramOpts::new(
            "ratelimit_decision_duration_seconds",
            "Duration of admission decisions in seconds",
        ))?;

        registry.register(Box::new(allowed_requests.clone()))?;
        registry.register(Box::new(denied_requests.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(decision_duration.clone()))?;

        Ok(Self {
            registry,
            allowed_requests,
            denied_requests,
            store_errors,
            decision_duration,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an allowed admission check
    pub fn record_allowed(&self, scope: &str) {
        self.allowed_requests.with_label_values(&[scope]).inc();
    }

    /// Record a denied admission check
    pub fn record_denied(&self, scope: &str) {
        self.denied_requests.with_label_values(&[scope]).inc();
    }

    /// Record a failed store transaction
    pub fn record_store_error(&self) {
        self.store_errors.inc();
    }

    /// Create a timer for measuring decision duration
    pub fn start_decision_timer(&self) -> prometheus::HistogramTimer {
        self.decision_duration.start_timer()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics")
    }
}
