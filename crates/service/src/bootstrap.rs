//! Wiring of the production adapters from configuration.

use thiserror::Error;
use tracing::info;

use ledger_core::LedgerError;
use ledger_events::{ResilientPublisher, TransportError};
use ledger_infra::{LedgerConfig, PostgresLedgerStore, RedisStreamsTransport};

use crate::LedgerService;

/// Ledger service backed by Postgres and Redis Streams.
pub type PgRedisLedgerService =
    LedgerService<PostgresLedgerStore, ResilientPublisher<RedisStreamsTransport>>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database: {0}")]
    Database(#[from] LedgerError),

    #[error("broker: {0}")]
    Broker(#[from] TransportError),
}

/// Connect the database pool and build the publisher.
///
/// The database is contacted eagerly; the broker connection is opened on the
/// first publish, so a broker outage at startup only affects eventing.
pub async fn connect(config: &LedgerConfig) -> Result<PgRedisLedgerService, BootstrapError> {
    let store = PostgresLedgerStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.acquire_timeout,
    )
    .await?;

    let broker = &config.broker;
    let transport = RedisStreamsTransport::new(&broker.redis_url, broker.topic.clone())?
        .with_timeouts(broker.connect_timeout, broker.response_timeout);
    let publisher =
        ResilientPublisher::new(transport, config.retry.clone(), config.breaker.clone());

    info!(
        topic = %broker.topic,
        connect_timeout_ms = broker.connect_timeout.as_millis() as u64,
        max_attempts = config.retry.attempts(),
        publish_mode = ?config.publish_mode,
        "ledger service ready"
    );

    Ok(LedgerService::new(store, publisher).with_publish_mode(config.publish_mode))
}
