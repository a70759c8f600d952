use redis::{aio::ConnectionManager, RedisResult, Script, Value};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::{RateLimitError, Result};
use crate::store::{WindowDecision, WindowStore};
use crate::utils::{duration_millis, TimeSource};

/// Atomic sliding-window evaluation.
///
/// `now` comes from the server's own clock (TIME), so every caller of a key
/// sees a single notion of "now" regardless of client clock skew. The member
/// appends an INCR-based counter to the timestamp so two entries admitted in
/// the same millisecond cannot collide. Both keys expire after one window.
const ALLOW_SCRIPT: &str = r#"
redis.replicate_commands()

local key = KEYS[1]
local counter_key = KEYS[2]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])

local time = redis.call('TIME')
local now = time[1] * 1000 + math.floor(time[2] / 1000)
local window_start = now - window_ms

redis.call('ZREMRANGEBYSCORE', key, '-inf', window_start)
local count = redis.call('ZCARD', key)

if count < limit then
    local counter = redis.call('INCR', counter_key)
    redis.call('ZADD', key, now, now .. ':' .. counter)
    redis.call('PEXPIRE', key, window_ms)
    redis.call('PEXPIRE', counter_key, window_ms)
    return {1, limit - count - 1, 0}
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local retry_after = 0
if #oldest >= 2 then
    retry_after = tonumber(oldest[2]) + window_ms - now
    if retry_after < 0 then
        retry_after = 0
    end
end
return {0, 0, retry_after}
"#;

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Some(Duration::from_secs(5)),
            command_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// Redis connection wrapper for window-store operations
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisClient {
    /// Create a new Redis client and verify the connection with PING.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            RateLimitError::Redis(e)
        })?;

        let connect_timeout = config.connection_timeout.unwrap_or(Duration::from_secs(10));
        let connection = match tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("Failed to create connection manager: {}", e);
                return Err(RateLimitError::Redis(e));
            }
            Err(_) => {
                warn!(
                    "Timeout while creating connection manager ({}s)",
                    connect_timeout.as_secs()
                );
                return Err(RateLimitError::Store(
                    "Timeout while creating Redis connection manager".to_string(),
                ));
            }
        };

        let ping_timeout = config.command_timeout.unwrap_or(Duration::from_secs(5));
        let mut conn = connection.clone();
        match tokio::time::timeout(
            ping_timeout,
            redis::cmd("PING").query_async::<_, ()>(&mut conn),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("Redis PING failed: {}", e);
                return Err(RateLimitError::Redis(e));
            }
            Err(_) => {
                warn!("Redis PING timeout ({}s)", ping_timeout.as_secs());
                return Err(RateLimitError::Store(
                    "Timeout while testing Redis connection".to_string(),
                ));
            }
        }

        info!("Redis client initialized successfully");
        Ok(Self { connection, config })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.config.command_timeout
    }

    /// Check if the connection is healthy
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(RateLimitError::Redis)?;
        Ok(())
    }
}

/// Redis-backed [`WindowStore`]: one Lua script per admission decision.
pub struct RedisWindowStore {
    client: RedisClient,
    script: Script,
    clock: TimeSource,
}

impl RedisWindowStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            script: Script::new(ALLOW_SCRIPT),
            clock: TimeSource::system(),
        }
    }

    /// Connect and wrap in one step.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        Ok(Self::new(RedisClient::new(config).await?))
    }

    fn counter_key(key: &str) -> String {
        format!("{}:counter", key)
    }

    /// Run a Redis operation under the configured command timeout.
    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match self.client.command_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result.map_err(RateLimitError::Redis),
                Err(_) => Err(RateLimitError::Store(
                    "Redis command timed out".to_string(),
                )),
            },
            None => fut.await.map_err(RateLimitError::Redis),
        }
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn check_and_record(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowDecision> {
        let counter_key = Self::counter_key(key);
        let window_ms = duration_millis(window);

        let reply = self
            .run(async {
                let mut conn = self.client.connection();
                self.script
                    .key(key)
                    .key(&counter_key)
                    .arg(limit)
                    .arg(window_ms)
                    .invoke_async::<_, Value>(&mut conn)
                    .await
            })
            .await?;

        parse_decision(reply)
    }

    async fn window_count(&self, key: &str, window: Duration) -> Result<u64> {
        let window_start = self
            .clock
            .now_millis()
            .saturating_sub(duration_millis(window));

        self.run(async {
            let mut conn = self.client.connection();
            redis::cmd("ZCOUNT")
                .arg(key)
                .arg(window_start)
                .arg("+inf")
                .query_async::<_, u64>(&mut conn)
                .await
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let counter_key = Self::counter_key(key);

        self.run(async {
            let mut conn = self.client.connection();
            redis::cmd("DEL")
                .arg(key)
                .arg(&counter_key)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.client.health_check().await
    }
}

/// Validate the script reply shape field by field. An unexpected shape is an
/// internal error, logged and propagated — never coerced to a default.
fn parse_decision(reply: Value) -> Result<WindowDecision> {
    let items = match reply {
        Value::Bulk(items) => items,
        other => {
            error!("Rate limit script returned a non-array reply: {:?}", other);
            return Err(RateLimitError::MalformedReply(format!(
                "expected array reply, got {:?}",
                other
            )));
        }
    };

    if items.len() != 3 {
        error!("Rate limit script returned {} fields, expected 3", items.len());
        return Err(RateLimitError::MalformedReply(format!(
            "expected 3 fields, got {}",
            items.len()
        )));
    }

    let field = |index: usize, name: &str| -> Result<i64> {
        match items[index] {
            Value::Int(v) => Ok(v),
            ref other => {
                error!("Unexpected type for {}: {:?}", name, other);
                Err(RateLimitError::MalformedReply(format!(
                    "unexpected type for {}: {:?}",
                    name, other
                )))
            }
        }
    };

    let allowed = field(0, "allowed")? == 1;
    let remaining = field(1, "remaining")?.max(0) as u32;
    let retry_after_millis = field(2, "retry_after")?.max(0) as u64;

    Ok(WindowDecision {
        allowed,
        remaining,
        retry_after_millis,
    })
}
