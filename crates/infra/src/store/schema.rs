//! `accounts` table definition and row mapping.
//!
//! Migration tooling lives outside this crate; [`ensure_schema`] is for
//! integration tests and local development.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ledger_core::{Account, AccountId, AccountType, LedgerError, LedgerResult, OwnerId};

use super::postgres::map_sqlx_error;

/// Idempotent DDL for the accounts table, one statement per entry.
pub const ACCOUNTS_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        owner_id UUID NOT NULL,
        balance NUMERIC NOT NULL DEFAULT 0,
        account_type TEXT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT accounts_updated_not_before_created CHECK (updated_at >= created_at)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_accounts_owner_created
        ON accounts (owner_id, created_at DESC)
    "#,
];

/// Columns selected wherever a full [`Account`] is read.
pub(crate) const ACCOUNT_COLUMNS: &str =
    "id, owner_id, balance, account_type, created_at, updated_at";

#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> LedgerResult<()> {
    for statement in ACCOUNTS_SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct AccountRow {
    id: uuid::Uuid,
    owner_id: uuid::Uuid,
    balance: Decimal,
    account_type: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AccountRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            balance: row.try_get("balance")?,
            account_type: row.try_get("account_type")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let account_type = row
            .account_type
            .as_deref()
            .map(str::parse::<AccountType>)
            .transpose()
            .map_err(|e| {
                LedgerError::storage(format!("corrupt account_type in row {}: {e}", row.id))
            })?;

        Ok(Account {
            id: AccountId::from_uuid(row.id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            account_type,
            balance: row.balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
