//! Account row model and the balance arithmetic applied to it.

use core::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::id::{AccountId, OwnerId};

/// Current UTC time at the precision the storage layer keeps (microseconds).
///
/// Truncating up front keeps an account returned from `create` identical to the
/// same account read back later.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Classification tag of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Fiat,
    Spot,
    Futures,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Fiat => "fiat",
            AccountType::Spot => "spot",
            AccountType::Futures => "futures",
        }
    }
}

impl core::fmt::Display for AccountType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fiat" => Ok(AccountType::Fiat),
            "spot" => Ok(AccountType::Spot),
            "futures" => Ok(AccountType::Futures),
            other => Err(LedgerError::validation(format!(
                "account type must be one of: fiat, spot, futures (got '{other}')"
            ))),
        }
    }
}

/// A monetary account owned by a principal.
///
/// `balance` is only ever changed through [`Account::apply_delta`], which is
/// what keeps `updated_at` moving exactly when the balance does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: OwnerId,
    #[serde(rename = "type")]
    pub account_type: Option<AccountType>,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A brand new account: fresh id, zero balance, `created_at == updated_at`.
    pub fn open(owner_id: OwnerId, account_type: Option<AccountType>, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            owner_id,
            account_type,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add `delta` to the balance with exact decimal arithmetic.
    ///
    /// Negative results are allowed. Fails only if the result does not fit the
    /// decimal representation, in which case the account is left untouched.
    pub fn apply_delta(
        &mut self,
        delta: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<BalanceChange> {
        let change = BalanceChange::compute(self, delta, now)?;
        self.balance = change.new_balance;
        self.updated_at = change.updated_at;
        Ok(change)
    }
}

/// Outcome of a committed balance adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub account_id: AccountId,
    #[serde(with = "rust_decimal::serde::str")]
    pub old_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub new_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub delta: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl BalanceChange {
    /// Compute the change `account.balance + delta` without mutating anything.
    ///
    /// `updated_at` never falls behind `created_at`, even if the wall clock
    /// stepped backwards since creation.
    pub fn compute(account: &Account, delta: Decimal, now: DateTime<Utc>) -> LedgerResult<Self> {
        // A failed computation aborts the transaction like any other step.
        let new_balance = account.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::storage(format!(
                "balance overflow: {} + {} is not representable",
                account.balance, delta
            ))
        })?;

        Ok(Self {
            account_id: account.id,
            old_balance: account.balance,
            new_balance,
            delta,
            updated_at: now.max(account.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn open_starts_at_exact_zero() {
        let now = now_utc();
        let account = Account::open(OwnerId::new(), Some(AccountType::Fiat), now);
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.created_at, account.updated_at);
        assert_eq!(account.account_type, Some(AccountType::Fiat));
    }

    #[test]
    fn apply_delta_is_exact() {
        let created = now_utc();
        let mut account = Account::open(OwnerId::new(), None, created);

        let first = account.apply_delta(dec!(0.1), created).unwrap();
        let second = account.apply_delta(dec!(0.2), created).unwrap();

        assert_eq!(first.old_balance, dec!(0));
        assert_eq!(second.old_balance, dec!(0.1));
        assert_eq!(account.balance, dec!(0.3));
    }

    #[test]
    fn negative_balances_are_permitted() {
        let now = now_utc();
        let mut account = Account::open(OwnerId::new(), None, now);
        let change = account.apply_delta(dec!(-20.00), now).unwrap();
        assert_eq!(change.new_balance, dec!(-20.00));
    }

    #[test]
    fn updated_at_never_precedes_created_at() {
        let created = now_utc();
        let mut account = Account::open(OwnerId::new(), None, created);
        let skewed = created - Duration::seconds(30);

        let change = account.apply_delta(dec!(1), skewed).unwrap();

        assert_eq!(change.updated_at, created);
        assert!(account.updated_at >= account.created_at);
    }

    #[test]
    fn overflow_leaves_account_untouched() {
        let now = now_utc();
        let mut account = Account::open(OwnerId::new(), None, now);
        account.apply_delta(Decimal::MAX, now).unwrap();

        let err = account.apply_delta(Decimal::MAX, now).unwrap_err();

        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(account.balance, Decimal::MAX);
    }

    #[test]
    fn account_type_parses_case_insensitively() {
        assert_eq!("SPOT".parse::<AccountType>().unwrap(), AccountType::Spot);
        assert!("margin".parse::<AccountType>().is_err());
    }

    proptest::proptest! {
        /// Applying deltas one by one lands exactly on the decimal sum.
        #[test]
        fn sequential_deltas_sum_exactly(
            cents in proptest::collection::vec(-1_000_000i64..1_000_000i64, 0..50)
        ) {
            let now = now_utc();
            let mut account = Account::open(OwnerId::new(), None, now);
            let mut expected = Decimal::ZERO;

            for c in cents {
                let delta = Decimal::new(c, 2);
                let change = account.apply_delta(delta, now).unwrap();
                proptest::prop_assert_eq!(change.old_balance + delta, change.new_balance);
                expected += delta;
            }

            proptest::prop_assert_eq!(account.balance, expected);
        }
    }

    #[test]
    fn balance_serializes_as_string() {
        let now = now_utc();
        let mut account = Account::open(OwnerId::new(), Some(AccountType::Futures), now);
        account.apply_delta(dec!(12.50), now).unwrap();

        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["balance"], "12.50");
        assert_eq!(json["type"], "futures");
    }
}
