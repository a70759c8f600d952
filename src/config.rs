use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{RateLimitError, Result};
use crate::utils::duration_millis;

/// Rate limit configuration for a single scope: `limit` requests per sliding
/// `window`. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    limit: u32,
    window: Duration,
}

impl Config {
    /// Create a configuration. A zero window is a construction-time error;
    /// `limit == 0` is valid and behaves as always-deny.
    pub fn new(limit: u32, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(RateLimitError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window })
    }

    /// Default per-IP limit: 100 requests per minute.
    pub fn per_ip_default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
        }
    }

    /// Default per-user limit: 1000 requests per minute.
    pub fn per_user_default() -> Self {
        Self {
            limit: 1000,
            window: Duration::from_secs(60),
        }
    }

    /// Default global safety-net limit: 10000 requests per minute.
    pub fn global_default() -> Self {
        Self {
            limit: 10000,
            window: Duration::from_secs(60),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_millis(&self) -> u64 {
        duration_millis(self.window)
    }
}

/// Maps named scopes (ip, user, global, per-service, custom) to their
/// [`Config`]. Lookup is exact-match only; names without an explicit entry
/// resolve to the default config.
#[derive(Debug, Clone)]
pub struct ScopeRegistry {
    default: Config,
    scopes: HashMap<String, Config>,
}

impl ScopeRegistry {
    pub fn new(default: Config) -> Self {
        Self {
            default,
            scopes: HashMap::new(),
        }
    }

    pub fn with_scope(mut self, name: impl Into<String>, config: Config) -> Self {
        self.scopes.insert(name.into(), config);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, config: Config) {
        self.scopes.insert(name.into(), config);
    }

    /// Resolve a scope name to its config, falling back to the default.
    /// Never fails at runtime.
    pub fn resolve(&self, scope: &str) -> Config {
        self.scopes.get(scope).copied().unwrap_or(self.default)
    }

    /// Strict lookup for startup wiring: an unknown scope name is a
    /// configuration error here, so typos surface before any request is
    /// served rather than mid-request.
    pub fn get(&self, scope: &str) -> Result<Config> {
        self.scopes
            .get(scope)
            .copied()
            .ok_or_else(|| RateLimitError::Config(format!("unknown scope: {}", scope)))
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.contains_key(scope)
    }

    pub fn default_config(&self) -> Config {
        self.default
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }
}

impl Default for ScopeRegistry {
    /// Registry with the demo defaults: ip 100/min, user 1000/min,
    /// global 10000/min, default falling back to the per-IP limit.
    fn default() -> Self {
        Self::new(Config::per_ip_default())
            .with_scope("ip", Config::per_ip_default())
            .with_scope("user", Config::per_user_default())
            .with_scope("global", Config::global_default())
    }
}

/// What the admission layer should do when the engine cannot decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit the request.
    Open,
    /// Reject the request.
    Closed,
}

/// Policy knobs for the two failure paths the engine surfaces but never
/// decides itself: the backing store being unreachable, and the client
/// identifier being undeterminable.
///
/// The default reproduces the reference behavior (store error admits,
/// missing identity rejects). Fail-open during a store outage removes all
/// protection, while fail-closed turns a store outage into a total service
/// outage — both knobs are independent so deployments can pick either
/// trade-off explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    pub on_store_error: FailMode,
    pub on_missing_identity: FailMode,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            on_store_error: FailMode::Open,
            on_missing_identity: FailMode::Closed,
        }
    }
}

impl FailurePolicy {
    pub fn admit_on_store_error(&self) -> bool {
        self.on_store_error == FailMode::Open
    }

    pub fn admit_on_missing_identity(&self) -> bool {
        self.on_missing_identity == FailMode::Open
    }
}

/// Raw, deserializable form of a scope limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitSpec {
    pub limit: u32,
    pub window_secs: u64,
}

impl LimitSpec {
    fn compile(self) -> Result<Config> {
        Config::new(self.limit, Duration::from_secs(self.window_secs))
    }
}

/// Raw, deserializable form of a [`ScopeRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub default: LimitSpec,
    #[serde(default)]
    pub scopes: HashMap<String, LimitSpec>,
}

impl RegistrySpec {
    /// Validate every entry and compile into a registry.
    pub fn compile(self) -> Result<ScopeRegistry> {
        let mut registry = ScopeRegistry::new(self.default.compile()?);
        for (name, spec) in self.scopes {
            let config = spec
                .compile()
                .map_err(|e| RateLimitError::Config(format!("scope {}: {}", name, e)))?;
            registry.insert(name, config);
        }
        Ok(registry)
    }
}

/// Load a scope registry from a YAML string.
pub fn load_registry_from_yaml(yaml: &str) -> Result<ScopeRegistry> {
    let spec: RegistrySpec = serde_yaml::from_str(yaml)
        .map_err(|e| RateLimitError::Config(format!("Failed to parse YAML: {}", e)))?;
    spec.compile()
}

/// Load a scope registry from a YAML file.
pub fn load_registry_from_file(path: &str) -> Result<ScopeRegistry> {
    let content = std::fs::read_to_string(path)?;
    load_registry_from_yaml(&content)
}
