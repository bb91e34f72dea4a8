//! Infrastructure layer: Postgres store, Redis broker transport, config.

pub mod broker;
pub mod config;
pub mod store;

pub use config::{BrokerConfig, ConfigError, DatabaseConfig, LedgerConfig, PublishMode};
pub use store::schema::{ACCOUNTS_SCHEMA, ensure_schema};
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};

#[cfg(feature = "redis")]
pub use broker::RedisStreamsTransport;
