//! Redis Streams transport.
//!
//! - **Stream key**: the configured topic (default `ledger:accounts:events`)
//! - **Entry fields**: `key` (event id), `event_type`, `value` (JSON payload)
//! - **Entry id**: assigned by Redis (`XADD <stream> * ...`)
//!
//! One `send` is one `XADD`. The connection is opened on first use and shared
//! afterwards. `ConnectionManager` makes a single connection attempt per send
//! (no retries of its own), bounded by `connect_timeout`; the command itself is
//! bounded by `response_timeout`. Retrying is left to the publisher's policy.

use std::sync::Mutex;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::{debug, instrument};

use ledger_events::{BrokerMessage, BrokerTransport, TransportError};

use crate::config::{DEFAULT_REDIS_CONNECT_TIMEOUT, DEFAULT_REDIS_RESPONSE_TIMEOUT};

// Backoff parameters are unused while the manager is built with zero retries.
const RECONNECT_EXPONENT_BASE: u64 = 2;
const RECONNECT_FACTOR: u64 = 100;
const RECONNECT_RETRIES: usize = 0;

enum Connection {
    Idle,
    Ready(ConnectionManager),
    Closed,
}

pub struct RedisStreamsTransport {
    client: redis::Client,
    stream_key: String,
    connect_timeout: Duration,
    response_timeout: Duration,
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for RedisStreamsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsTransport")
            .field("stream_key", &self.stream_key)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsTransport {
    /// Validates the URL; no connection is made until the first send.
    pub fn new(redis_url: &str, stream_key: impl Into<String>) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TransportError::Unavailable(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client,
            stream_key: stream_key.into(),
            connect_timeout: DEFAULT_REDIS_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_REDIS_RESPONSE_TIMEOUT,
            connection: Mutex::new(Connection::Idle),
        })
    }

    /// Bound the TCP connect and each command's reply.
    pub fn with_timeouts(mut self, connect_timeout: Duration, response_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.response_timeout = response_timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    async fn connection(&self) -> Result<ConnectionManager, TransportError> {
        {
            let slot = self.lock();
            match &*slot {
                Connection::Ready(manager) => return Ok(manager.clone()),
                Connection::Closed => return Err(TransportError::Closed),
                Connection::Idle => {}
            }
        }

        let manager = ConnectionManager::new_with_backoff_and_timeouts(
            self.client.clone(),
            RECONNECT_EXPONENT_BASE,
            RECONNECT_FACTOR,
            RECONNECT_RETRIES,
            self.response_timeout,
            self.connect_timeout,
        )
        .await
        .map_err(classify)?;

        let mut slot = self.lock();
        match &*slot {
            // Lost a race with another sender; use the winner's connection.
            Connection::Ready(existing) => Ok(existing.clone()),
            Connection::Closed => Err(TransportError::Closed),
            Connection::Idle => {
                *slot = Connection::Ready(manager.clone());
                Ok(manager)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl BrokerTransport for RedisStreamsTransport {
    fn topic(&self) -> &str {
        &self.stream_key
    }

    #[instrument(
        name = "ledger.broker.xadd",
        skip(self, message),
        fields(stream_key = %self.stream_key, key = %message.key, event_type = %message.event_type),
        err
    )]
    async fn send(&self, message: &BrokerMessage) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;

        let entry_id: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("key")
            .arg(&message.key)
            .arg("event_type")
            .arg(&message.event_type)
            .arg("value")
            .arg(&message.value)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        debug!(entry_id = %entry_id, "stream entry appended");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the last manager clone closes the socket.
        *self.lock() = Connection::Closed;
        Ok(())
    }
}

fn classify(err: redis::RedisError) -> TransportError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::Rejected(err.to_string())
    }
}
