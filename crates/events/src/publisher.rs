//! Publisher boundary: what the ledger service talks to after a commit.

use std::sync::Arc;

use thiserror::Error;

use ledger_core::{CallContext, LedgerError};

use crate::domain::{AccountCreated, BalanceUpdated};

/// Why an event did not reach the broker.
///
/// Kept separate from storage failures so a publish problem can never be
/// mistaken for a failed mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The breaker is open (or its half-open trial slots are taken); the
    /// broker was not contacted.
    #[error("circuit breaker open; broker not contacted")]
    CircuitOpen,

    #[error("publish failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("publish deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },

    #[error("event encoding failed: {0}")]
    Encode(String),

    #[error("publisher closed")]
    Closed,

    #[error("broker transport error: {0}")]
    Transport(String),
}

impl From<PublishError> for LedgerError {
    fn from(value: PublishError) -> Self {
        LedgerError::publish(value.to_string())
    }
}

/// Delivers ledger events to a message broker.
///
/// Implementations must:
/// - never retry without bound
/// - respect the deadline carried by `ctx`
/// - stop all work for a call once its future is dropped
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_account_created(
        &self,
        ctx: &CallContext,
        event: &AccountCreated,
    ) -> Result<(), PublishError>;

    async fn publish_balance_updated(
        &self,
        ctx: &CallContext,
        event: &BalanceUpdated,
    ) -> Result<(), PublishError>;

    /// Release the broker connection. Later publishes fail with `Closed`.
    async fn close(&self) -> Result<(), PublishError>;
}

#[async_trait::async_trait]
impl<P> EventPublisher for Arc<P>
where
    P: EventPublisher + ?Sized,
{
    async fn publish_account_created(
        &self,
        ctx: &CallContext,
        event: &AccountCreated,
    ) -> Result<(), PublishError> {
        (**self).publish_account_created(ctx, event).await
    }

    async fn publish_balance_updated(
        &self,
        ctx: &CallContext,
        event: &BalanceUpdated,
    ) -> Result<(), PublishError> {
        (**self).publish_balance_updated(ctx, event).await
    }

    async fn close(&self) -> Result<(), PublishError> {
        (**self).close().await
    }
}
