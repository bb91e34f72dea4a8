//! Raw broker transport (one send = one broker round-trip).

use std::sync::Arc;

use thiserror::Error;

use crate::envelope::BrokerMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),

    /// The transport was closed locally; retrying cannot help.
    #[error("transport closed")]
    Closed,
}

/// A single-attempt connection to a topic on a message broker.
///
/// Retry and circuit breaking live above this trait, in
/// [`crate::ResilientPublisher`].
#[async_trait::async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Topic (or stream key) messages are written to.
    fn topic(&self) -> &str;

    async fn send(&self, message: &BrokerMessage) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
impl<T> BrokerTransport for Arc<T>
where
    T: BrokerTransport + ?Sized,
{
    fn topic(&self) -> &str {
        (**self).topic()
    }

    async fn send(&self, message: &BrokerMessage) -> Result<(), TransportError> {
        (**self).send(message).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }
}
