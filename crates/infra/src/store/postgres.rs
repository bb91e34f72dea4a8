//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate account id |
//! | Database (other) | Any other | `Storage` | Check constraint, serialization failure, ... |
//! | RowNotFound | N/A | `NotFound` | Account does not exist |
//! | PoolTimedOut / PoolClosed | N/A | `Storage` | Pool exhausted or shut down |
//! | Other | N/A | `Storage` | Network errors, decode failures, ... |
//!
//! ## Locking
//!
//! `adjust_balance` takes `SELECT ... FOR UPDATE` on the account row inside a
//! transaction. The lock is released on commit, on rollback, and when the
//! transaction is dropped (sqlx rolls back an uncommitted transaction on drop),
//! so a cancelled call never leaves the row locked.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{Span, debug, instrument};

use ledger_core::{
    Account, AccountId, AccountType, BalanceChange, CallContext, LedgerError, LedgerResult,
    OwnerId, Page, now_utc,
};

use super::schema::{ACCOUNT_COLUMNS, AccountRow};
use super::{LedgerStore, with_deadline};

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`, failing if no connection can be
    /// established within `acquire_timeout`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(
        parent = ctx.span(),
        name = "ledger.store.create_account",
        skip(self, ctx),
        fields(owner_id = %owner_id, account_id),
        err
    )]
    pub async fn insert_account(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Account> {
        let account = Account::open(owner_id, account_type, now_utc());
        Span::current().record("account_id", tracing::field::display(account.id));

        with_deadline(ctx, "create_account", async {
            sqlx::query(
                r#"
                INSERT INTO accounts (id, owner_id, balance, account_type, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(account.id.as_uuid())
            .bind(account.owner_id.as_uuid())
            .bind(account.balance)
            .bind(account.account_type.map(|t| t.as_str()))
            .bind(account.created_at)
            .bind(account.updated_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_account", e))?;

            Ok(())
        })
        .await?;

        Ok(account)
    }

    #[instrument(
        parent = ctx.span(),
        name = "ledger.store.get_account",
        skip(self, ctx),
        fields(account_id = %id),
        err
    )]
    pub async fn fetch_account(&self, ctx: &CallContext, id: AccountId) -> LedgerResult<Account> {
        with_deadline(ctx, "get_account", async {
            let row = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?
            .ok_or(LedgerError::NotFound)?;

            decode_account(&row)
        })
        .await
    }

    #[instrument(
        parent = ctx.span(),
        name = "ledger.store.list_accounts",
        skip(self, ctx),
        fields(owner_id = %owner_id, offset = page.offset(), limit = page.limit(), returned),
        err
    )]
    pub async fn fetch_accounts(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        page: Page,
    ) -> LedgerResult<Vec<Account>> {
        let offset = i64::try_from(page.offset())
            .map_err(|_| LedgerError::validation("offset out of range"))?;
        let limit = i64::try_from(page.limit())
            .map_err(|_| LedgerError::validation("limit out of range"))?;

        let accounts = with_deadline(ctx, "list_accounts", async {
            // `id` breaks ties between accounts created in the same microsecond.
            let rows = sqlx::query(&format!(
                r#"
                SELECT {ACCOUNT_COLUMNS}
                FROM accounts
                WHERE owner_id = $1
                ORDER BY created_at DESC, id DESC
                OFFSET $2 LIMIT $3
                "#
            ))
            .bind(owner_id.as_uuid())
            .bind(offset)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_accounts", e))?;

            rows.iter().map(decode_account).collect::<LedgerResult<Vec<_>>>()
        })
        .await?;

        Span::current().record("returned", accounts.len());
        Ok(accounts)
    }

    /// Read-modify-write of one balance inside a transaction.
    ///
    /// 1. Begin a transaction
    /// 2. Lock the row (`SELECT ... FOR UPDATE`)
    /// 3. Compute `new = old + delta` with exact decimal arithmetic
    /// 4. Write the balance and advance `updated_at`
    /// 5. Commit
    ///
    /// Any early return drops `tx`, which rolls the transaction back.
    #[instrument(
        parent = ctx.span(),
        name = "ledger.store.adjust_balance",
        skip(self, ctx),
        fields(account_id = %id, delta = %delta),
        err
    )]
    pub async fn apply_adjustment(
        &self,
        ctx: &CallContext,
        id: AccountId,
        delta: Decimal,
    ) -> LedgerResult<BalanceChange> {
        with_deadline(ctx, "adjust_balance", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;

            let row = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_account", e))?
            .ok_or(LedgerError::NotFound)?;

            let account = decode_account(&row)?;
            let change = BalanceChange::compute(&account, delta, now_utc())?;

            sqlx::query("UPDATE accounts SET balance = $1, updated_at = $2 WHERE id = $3")
                .bind(change.new_balance)
                .bind(change.updated_at)
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_balance", e))?;

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;

            debug!(old = %change.old_balance, new = %change.new_balance, "balance committed");
            Ok(change)
        })
        .await
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn create_account(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Account> {
        self.insert_account(ctx, owner_id, account_type).await
    }

    async fn get_account(&self, ctx: &CallContext, id: AccountId) -> LedgerResult<Account> {
        self.fetch_account(ctx, id).await
    }

    async fn list_accounts(
        &self,
        ctx: &CallContext,
        owner_id: OwnerId,
        page: Page,
    ) -> LedgerResult<Vec<Account>> {
        self.fetch_accounts(ctx, owner_id, page).await
    }

    async fn adjust_balance(
        &self,
        ctx: &CallContext,
        id: AccountId,
        delta: Decimal,
    ) -> LedgerResult<BalanceChange> {
        self.apply_adjustment(ctx, id, delta).await
    }
}

fn decode_account(row: &sqlx::postgres::PgRow) -> LedgerResult<Account> {
    let row = AccountRow::from_row(row)
        .map_err(|e| LedgerError::storage(format!("failed to decode account row: {e}")))?;
    Account::try_from(row)
}

/// Map SQLx errors to LedgerError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerError::Conflict(msg),
                _ => LedgerError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => LedgerError::NotFound,
        sqlx::Error::PoolTimedOut => {
            LedgerError::storage(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::storage(format!("connection pool closed in {}", operation))
        }
        _ => LedgerError::storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
