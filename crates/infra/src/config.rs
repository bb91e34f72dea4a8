//! Configuration loaded from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `DATABASE_ACQUIRE_TIMEOUT_MS` | `5000` |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `REDIS_CONNECT_TIMEOUT_MS` | `1000` |
//! | `REDIS_RESPONSE_TIMEOUT_MS` | `1000` |
//! | `LEDGER_EVENTS_TOPIC` | `ledger:accounts:events` |
//! | `PUBLISH_MAX_ATTEMPTS` | `3` |
//! | `PUBLISH_BASE_BACKOFF_MS` | `100` |
//! | `BREAKER_FAILURE_THRESHOLD` | `5` |
//! | `BREAKER_INTERVAL_SECS` | `60` |
//! | `BREAKER_OPEN_TIMEOUT_SECS` | `30` |
//! | `BREAKER_HALF_OPEN_MAX_REQUESTS` | `5` |
//! | `LEDGER_PUBLISH_MODE` | `inline` (or `detached`) |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use ledger_events::{BreakerSettings, RetryPolicy};

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_EVENTS_TOPIC: &str = "ledger:accounts:events";
pub const DEFAULT_REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_REDIS_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// How the service hands events to the publisher after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Await the publish inside the call; failures are logged and swallowed.
    #[default]
    Inline,
    /// Spawn the publish and return right after the commit.
    Detached,
}

impl FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(PublishMode::Inline),
            "detached" => Ok(PublishMode::Detached),
            other => Err(format!("expected `inline` or `detached`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub redis_url: String,
    pub topic: String,
    /// Bound on opening the broker connection; one attempt per send.
    pub connect_timeout: Duration,
    /// Bound on waiting for a single command's reply.
    pub response_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub retry: RetryPolicy,
    pub breaker: BreakerSettings,
    pub publish_mode: PublishMode,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let database = DatabaseConfig {
            url: env.required("DATABASE_URL")?,
            max_connections: env.parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            acquire_timeout: env.millis("DATABASE_ACQUIRE_TIMEOUT_MS", Duration::from_secs(5))?,
        };

        let broker = BrokerConfig {
            redis_url: env.string("REDIS_URL", DEFAULT_REDIS_URL),
            topic: env.string("LEDGER_EVENTS_TOPIC", DEFAULT_EVENTS_TOPIC),
            connect_timeout: env.millis("REDIS_CONNECT_TIMEOUT_MS", DEFAULT_REDIS_CONNECT_TIMEOUT)?,
            response_timeout: env
                .millis("REDIS_RESPONSE_TIMEOUT_MS", DEFAULT_REDIS_RESPONSE_TIMEOUT)?,
        };

        let retry = RetryPolicy::exponential(
            env.positive("PUBLISH_MAX_ATTEMPTS", 3)?,
            Duration::from_millis(env.parsed("PUBLISH_BASE_BACKOFF_MS", 100)?),
        );

        let breaker = BreakerSettings {
            failure_threshold: env.positive("BREAKER_FAILURE_THRESHOLD", 5)?,
            interval: Duration::from_secs(env.parsed("BREAKER_INTERVAL_SECS", 60)?),
            open_timeout: Duration::from_secs(env.parsed("BREAKER_OPEN_TIMEOUT_SECS", 30)?),
            half_open_max_requests: env.positive("BREAKER_HALF_OPEN_MAX_REQUESTS", 5)?,
        };

        let publish_mode = env.parsed("LEDGER_PUBLISH_MODE", PublishMode::Inline)?;

        Ok(Self {
            database,
            broker,
            retry,
            breaker,
            publish_mode,
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// A positive millisecond count.
    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.parsed(key, default.as_millis() as u64)? {
            0 => Err(ConfigError::Invalid {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            }),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    fn positive(&self, key: &str, default: u32) -> Result<u32, ConfigError> {
        match self.parsed(key, default)? {
            0 => Err(ConfigError::Invalid {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            }),
            value => Ok(value),
        }
    }
}
