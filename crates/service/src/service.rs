//! The ledger's public contract: create, get, list, adjust.
//!
//! A mutation is committed by the store first and only then handed to the
//! publisher. Eventing is best-effort: a publish failure is logged and never
//! fails or rolls back the mutation that triggered it.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{Instrument, Span, info_span, instrument, warn};

use ledger_core::{
    Account, AccountId, AccountType, BalanceChange, CallContext, LedgerError, LedgerResult,
    OwnerId, Page,
};
use ledger_events::{
    AccountCreated, BalanceUpdated, Event, EventPublisher, LedgerEvent, PublishError,
};
use ledger_infra::{LedgerStore, PublishMode};

/// Reason recorded on balance events when the caller gives none.
pub const DEFAULT_REASON: &str = "manual-update";

pub struct LedgerService<S, P> {
    store: S,
    publisher: Arc<P>,
    mode: PublishMode,
}

impl<S, P> std::fmt::Debug for LedgerService<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerService")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<S, P> LedgerService<S, P>
where
    S: LedgerStore,
    P: EventPublisher + 'static,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self::with_shared_publisher(store, Arc::new(publisher))
    }

    pub fn with_shared_publisher(store: S, publisher: Arc<P>) -> Self {
        Self {
            store,
            publisher,
            mode: PublishMode::default(),
        }
    }

    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn publish_mode(&self) -> PublishMode {
        self.mode
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<P> {
        &self.publisher
    }

    /// Open a new account and announce it.
    #[instrument(
        parent = ctx.span(),
        name = "ledger.create_account",
        skip(self, ctx),
        fields(owner_id = %owner_id, account_id),
        err
    )]
    pub async fn create_account(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Account> {
        ensure_not_nil(owner_id.as_uuid(), "owner_id")?;
        let ctx = ctx.clone().with_span(Span::current());

        let account = self.store.create_account(&ctx, owner_id, account_type).await?;
        Span::current().record("account_id", tracing::field::display(account.id));

        self.emit(&ctx, AccountCreated::for_account(&account).into())
            .await;
        Ok(account)
    }

    #[instrument(
        parent = ctx.span(),
        name = "ledger.get_account",
        skip(self, ctx),
        fields(account_id = %id),
        err
    )]
    pub async fn get_account(&self, ctx: &CallContext, id: AccountId) -> LedgerResult<Account> {
        ensure_not_nil(id.as_uuid(), "account_id")?;
        let ctx = ctx.clone().with_span(Span::current());
        self.store.get_account(&ctx, id).await
    }

    /// Accounts of `owner_id`, newest first.
    ///
    /// Negative `offset` or non-positive `limit` is a validation error and
    /// never reaches the store.
    #[instrument(
        parent = ctx.span(),
        name = "ledger.list_accounts",
        skip(self, ctx),
        fields(owner_id = %owner_id),
        err
    )]
    pub async fn list_accounts(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        offset: i64,
        limit: i64,
    ) -> LedgerResult<Vec<Account>> {
        ensure_not_nil(owner_id.as_uuid(), "owner_id")?;
        let page = Page::new(offset, limit)?;
        let ctx = ctx.clone().with_span(Span::current());
        self.store.list_accounts(&ctx, owner_id, page).await
    }

    /// Apply `delta` and announce the change.
    ///
    /// A blank `reason` is recorded as [`DEFAULT_REASON`].
    #[instrument(
        parent = ctx.span(),
        name = "ledger.adjust_balance",
        skip(self, ctx, reason),
        fields(account_id = %id, delta = %delta),
        err
    )]
    pub async fn adjust_balance(
        &self,
        ctx: &CallContext,
        id: AccountId,
        delta: Decimal,
        reason: &str,
    ) -> LedgerResult<BalanceChange> {
        ensure_not_nil(id.as_uuid(), "account_id")?;
        let ctx = ctx.clone().with_span(Span::current());

        let change = self.store.adjust_balance(&ctx, id, delta).await?;

        let reason = match reason.trim() {
            "" => DEFAULT_REASON,
            given => given,
        };
        self.emit(&ctx, BalanceUpdated::from_change(&change, reason).into())
            .await;
        Ok(change)
    }

    /// Release the broker connection. The store's pool is left to its owner.
    pub async fn close(&self) -> LedgerResult<()> {
        self.publisher.close().await.map_err(LedgerError::from)
    }

    async fn emit(&self, ctx: &CallContext, event: LedgerEvent) {
        match self.mode {
            PublishMode::Inline => {
                if let Err(err) = publish(self.publisher.as_ref(), ctx, &event).await {
                    log_dropped(&event, &err);
                }
            }
            PublishMode::Detached => {
                let publisher = Arc::clone(&self.publisher);
                let ctx = ctx.clone();
                let span = info_span!(
                    parent: ctx.span(),
                    "ledger.publish_detached",
                    event_id = %event.event_id()
                );
                tokio::spawn(
                    async move {
                        if let Err(err) = publish(publisher.as_ref(), &ctx, &event).await {
                            log_dropped(&event, &err);
                        }
                    }
                    .instrument(span),
                );
            }
        }
    }
}

async fn publish<P>(
    publisher: &P,
    ctx: &CallContext,
    event: &LedgerEvent,
) -> Result<(), PublishError>
where
    P: EventPublisher + ?Sized,
{
    match event {
        LedgerEvent::AccountCreated(e) => publisher.publish_account_created(ctx, e).await,
        LedgerEvent::BalanceUpdated(e) => publisher.publish_balance_updated(ctx, e).await,
    }
}

fn log_dropped(event: &LedgerEvent, err: &PublishError) {
    warn!(
        event_id = %event.event_id(),
        event_type = event.event_type(),
        account_id = %event.account_id(),
        error = %err,
        "event not published; mutation kept"
    );
}

fn ensure_not_nil(id: &uuid::Uuid, field: &str) -> LedgerResult<()> {
    if id.is_nil() {
        return Err(LedgerError::validation(format!("{field} must not be nil")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use super::*;
    use ledger_events::{BreakerSettings, InMemoryTransport, ResilientPublisher, RetryPolicy};
    use ledger_infra::InMemoryLedgerStore;

    type TestService =
        LedgerService<InMemoryLedgerStore, ResilientPublisher<Arc<InMemoryTransport>>>;

    fn service() -> (TestService, Arc<InMemoryTransport>) {
        let transport = Arc::new(InMemoryTransport::default());
        let publisher = ResilientPublisher::new(
            transport.clone(),
            RetryPolicy::exponential(2, Duration::from_millis(10)),
            BreakerSettings::default(),
        );
        (LedgerService::new(InMemoryLedgerStore::new(), publisher), transport)
    }

    fn ctx() -> CallContext {
        CallContext::background()
    }

    #[tokio::test(start_paused = true)]
    async fn blank_reason_falls_back_to_default() {
        let (service, transport) = service();
        let account = service.create_account(&ctx(), OwnerId::new(), None).await.unwrap();

        service.adjust_balance(&ctx(), account.id, dec!(1), "   ").await.unwrap();
        service.adjust_balance(&ctx(), account.id, dec!(1), "refund").await.unwrap();

        let reasons: Vec<String> = transport
            .delivered()
            .iter()
            .filter_map(|m| match m.decode().unwrap() {
                LedgerEvent::BalanceUpdated(e) => Some(e.reason),
                LedgerEvent::AccountCreated(_) => None,
            })
            .collect();
        assert_eq!(reasons, vec![DEFAULT_REASON.to_string(), "refund".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_pagination_is_rejected() {
        let (service, _) = service();
        let owner = OwnerId::new();

        for (offset, limit) in [(-1, 10), (0, 0), (0, -5)] {
            let err = service
                .list_accounts(&ctx(), owner, offset, limit)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "{offset}/{limit}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nil_identifiers_are_rejected() {
        let (service, _) = service();
        let nil = AccountId::from_uuid(uuid::Uuid::nil());

        let err = service.get_account(&ctx(), nil).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert!(service.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_does_not_fail_the_mutation() {
        let (service, transport) = service();
        transport.set_down(true);

        let account = service.create_account(&ctx(), OwnerId::new(), None).await.unwrap();
        let change = service
            .adjust_balance(&ctx(), account.id, dec!(12.50), "deposit")
            .await
            .unwrap();

        assert_eq!(change.new_balance, dec!(12.50));
        assert_eq!(service.get_account(&ctx(), account.id).await.unwrap().balance, dec!(12.50));
        assert!(transport.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn store_errors_propagate_unchanged() {
        let (service, transport) = service();

        let err = service
            .adjust_balance(&ctx(), AccountId::new(), dec!(1), "")
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::NotFound);
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_mode_publishes_in_the_background() {
        let (service, transport) = service();
        let service = service.with_publish_mode(PublishMode::Detached);

        let account = service.create_account(&ctx(), OwnerId::new(), None).await.unwrap();

        // Let the spawned publish run.
        tokio::time::sleep(Duration::from_millis(1)).await;

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        match delivered[0].decode().unwrap() {
            LedgerEvent::AccountCreated(e) => assert_eq!(e.account_id, account.id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_the_publisher() {
        let (service, transport) = service();
        service.close().await.unwrap();
        assert!(transport.is_closed());

        // Mutations still succeed; the event is dropped.
        let account = service.create_account(&ctx(), OwnerId::new(), None).await.unwrap();
        assert_eq!(service.get_account(&ctx(), account.id).await.unwrap(), account);
    }
}
