//! Account storage.
//!
//! The store owns the locking discipline for balance mutation: an adjustment
//! reads the current balance under an exclusive per-account lock, writes the
//! new one, and releases the lock on commit. Adjustments on different accounts
//! never wait on each other.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;

use ledger_core::{
    Account, AccountId, AccountType, BalanceChange, CallContext, LedgerError, LedgerResult,
    OwnerId, Page,
};

pub mod in_memory;
pub mod postgres;
pub mod schema;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// Durable, transactional storage of accounts.
///
/// Every operation honors the deadline carried by `ctx`; dropping the returned
/// future abandons the operation and rolls back anything uncommitted.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a new account with a zero balance.
    async fn create_account(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Account>;

    async fn get_account(&self, ctx: &CallContext, id: AccountId) -> LedgerResult<Account>;

    /// Accounts of one owner, newest first.
    async fn list_accounts(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        page: Page,
    ) -> LedgerResult<Vec<Account>>;

    /// Apply `delta` to the balance under the account's row lock.
    ///
    /// Fails with `NotFound` for an unknown account and `Storage` for anything
    /// else, including a balance the decimal type cannot represent. A failed
    /// adjustment changes nothing.
    async fn adjust_balance(
        &self,
        ctx: &CallContext,
        id: AccountId,
        delta: Decimal,
    ) -> LedgerResult<BalanceChange>;
}

#[async_trait::async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn create_account(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Account> {
        (**self).create_account(ctx, owner_id, account_type).await
    }

    async fn get_account(&self, ctx: &CallContext, id: AccountId) -> LedgerResult<Account> {
        (**self).get_account(ctx, id).await
    }

    async fn list_accounts(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        page: Page,
    ) -> LedgerResult<Vec<Account>> {
        (**self).list_accounts(ctx, owner_id, page).await
    }

    async fn adjust_balance(
        &self,
        ctx: &CallContext,
        id: AccountId,
        delta: Decimal,
    ) -> LedgerResult<BalanceChange> {
        (**self).adjust_balance(ctx, id, delta).await
    }
}

/// Run a store operation under the caller's deadline.
///
/// On expiry the inner future is dropped, which for a transaction means a
/// rollback.
pub(crate) async fn with_deadline<T, F>(
    ctx: &CallContext,
    operation: &'static str,
    fut: F,
) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    if ctx.is_expired() {
        return Err(deadline_exceeded(operation));
    }

    match ctx.deadline() {
        None => fut.await,
        Some(deadline) => {
            tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
                .await
                .map_err(|_| deadline_exceeded(operation))?
        }
    }
}

fn deadline_exceeded(operation: &str) -> LedgerError {
    LedgerError::storage(format!("deadline exceeded in {operation}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_surfaces_as_storage_error() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));

        let err = with_deadline(&ctx, "adjust_balance", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, LedgerError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(err, LedgerError::storage("deadline exceeded in adjust_balance"));
    }

    #[tokio::test]
    async fn expired_context_never_starts_the_operation() {
        let ctx = CallContext::background().with_timeout(Duration::ZERO);

        let err = with_deadline(&ctx, "get_account", std::future::pending::<LedgerResult<()>>())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[tokio::test]
    async fn no_deadline_runs_to_completion() {
        let value = with_deadline(&CallContext::background(), "get_account", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
