use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{Instrument, info_span};

use ledger_core::{
    Account, AccountId, AccountType, BalanceChange, CallContext, LedgerError, LedgerResult,
    OwnerId, Page, now_utc,
};

use super::{LedgerStore, with_deadline};

type AccountCell = Arc<Mutex<Account>>;

/// In-memory ledger store.
///
/// Intended for tests/dev. Each account sits behind its own async mutex, which
/// plays the part of the row lock: adjustments on one account queue up, other
/// accounts are unaffected.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: RwLock<HashMap<AccountId, AccountCell>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.read().map(|accounts| accounts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, id: AccountId) -> LedgerResult<AccountCell> {
        self.read()?.get(&id).cloned().ok_or(LedgerError::NotFound)
    }

    fn read(
        &self,
    ) -> LedgerResult<std::sync::RwLockReadGuard<'_, HashMap<AccountId, AccountCell>>> {
        self.accounts
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Account> {
        let span = info_span!(
            parent: ctx.span(),
            "ledger.store.create_account",
            owner_id = %owner_id
        );
        with_deadline(ctx, "create_account", async {
            let account = Account::open(owner_id, account_type, now_utc());
            let mut accounts = self
                .accounts
                .write()
                .map_err(|_| LedgerError::storage("lock poisoned"))?;

            match accounts.entry(account.id) {
                Entry::Occupied(_) => Err(LedgerError::conflict(format!(
                    "account {} already exists",
                    account.id
                ))),
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(account.clone())));
                    Ok(account)
                }
            }
        })
        .instrument(span)
        .await
    }

    async fn get_account(&self, ctx: &CallContext, id: AccountId) -> LedgerResult<Account> {
        let span = info_span!(parent: ctx.span(), "ledger.store.get_account", account_id = %id);
        with_deadline(ctx, "get_account", async {
            let cell = self.cell(id)?;
            let account = cell.lock().await;
            Ok(account.clone())
        })
        .instrument(span)
        .await
    }

    async fn list_accounts(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        page: Page,
    ) -> LedgerResult<Vec<Account>> {
        let span = info_span!(
            parent: ctx.span(),
            "ledger.store.list_accounts",
            owner_id = %owner_id
        );
        with_deadline(ctx, "list_accounts", async {
            let cells: Vec<AccountCell> = self.read()?.values().cloned().collect();

            let mut owned = Vec::new();
            for cell in cells {
                let account = cell.lock().await;
                if account.owner_id == owner_id {
                    owned.push(account.clone());
                }
            }

            owned.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            });

            let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
            let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
            Ok(owned.into_iter().skip(offset).take(limit).collect())
        })
        .instrument(span)
        .await
    }

    async fn adjust_balance(
        &self,
        ctx: &CallContext,
        id: AccountId,
        delta: Decimal,
    ) -> LedgerResult<BalanceChange> {
        let span = info_span!(
            parent: ctx.span(),
            "ledger.store.adjust_balance",
            account_id = %id,
            delta = %delta
        );
        with_deadline(ctx, "adjust_balance", async {
            let cell = self.cell(id)?;
            let mut account = cell.lock().await;
            // `apply_delta` leaves the account untouched on error.
            account.apply_delta(delta, now_utc())
        })
        .instrument(span)
        .await
    }
}
