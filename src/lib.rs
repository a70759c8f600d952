//! Sliding Window Rate Limit Engine
//!
//! A sliding-window rate limiting engine with a Redis backend. For each
//! (scope, client) pair the engine decides whether a request may proceed,
//! evaluating and recording consumption in one atomic store transaction so
//! decisions stay race-free under arbitrary concurrent access from multiple
//! processes sharing one store.

pub mod config;
pub mod error;
pub mod key;
pub mod limiter;
pub mod memory;
pub mod metrics;
pub mod redis;
pub mod store;
pub mod utils;

// Re-export main types
pub use config::{
    load_registry_from_file, load_registry_from_yaml, Config, FailMode, FailurePolicy,
    LimitSpec, RegistrySpec, ScopeRegistry,
};
pub use error::{RateLimitError, Result};
pub use key::{storage_key, ClientId, MAX_CLIENT_ID_LEN};
pub use limiter::{RateLimitDecision, SlidingWindowLimiter, UsageStats, DEFAULT_KEY_PREFIX};
pub use memory::MemoryWindowStore;
pub use metrics::Metrics;
pub use redis::{RedisClient, RedisConfig, RedisWindowStore};
pub use store::{WindowDecision, WindowStore};
pub use utils::TimeSource;
