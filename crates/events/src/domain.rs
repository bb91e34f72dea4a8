//! The two ledger domain events and their tagged union.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledger_core::{Account, AccountId, AccountType, BalanceChange, EventId, OwnerId, now_utc};

use crate::event::Event;

pub const ACCOUNT_CREATED: &str = "account.created";
pub const BALANCE_UPDATED: &str = "balance.updated";

/// Emitted once an account row has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub event_id: EventId,
    pub account_id: AccountId,
    pub owner_id: OwnerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,
    pub timestamp: DateTime<Utc>,
}

impl AccountCreated {
    pub fn for_account(account: &Account) -> Self {
        Self {
            event_id: EventId::new(),
            account_id: account.id,
            owner_id: account.owner_id,
            account_type: account.account_type,
            timestamp: now_utc(),
        }
    }
}

/// Emitted once a balance adjustment has been committed.
///
/// Amounts travel as decimal strings so no consumer has to go through a
/// binary float.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdated {
    pub event_id: EventId,
    pub account_id: AccountId,
    #[serde(with = "rust_decimal::serde::str")]
    pub old_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub new_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub delta: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl BalanceUpdated {
    pub fn from_change(change: &BalanceChange, reason: impl Into<String>) -> Self {
        Self {
            event_id: EventId::new(),
            account_id: change.account_id,
            old_balance: change.old_balance,
            new_balance: change.new_balance,
            delta: change.delta,
            reason: reason.into(),
            timestamp: now_utc(),
        }
    }
}

impl Event for AccountCreated {
    fn event_id(&self) -> EventId {
        self.event_id
    }

    fn event_type(&self) -> &'static str {
        ACCOUNT_CREATED
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Event for BalanceUpdated {
    fn event_id(&self) -> EventId {
        self.event_id
    }

    fn event_type(&self) -> &'static str {
        BALANCE_UPDATED
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Wire form of every ledger event: `{"type": "<event type>", ...fields}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    #[serde(rename = "account.created")]
    AccountCreated(AccountCreated),
    #[serde(rename = "balance.updated")]
    BalanceUpdated(BalanceUpdated),
}

impl From<AccountCreated> for LedgerEvent {
    fn from(value: AccountCreated) -> Self {
        LedgerEvent::AccountCreated(value)
    }
}

impl From<BalanceUpdated> for LedgerEvent {
    fn from(value: BalanceUpdated) -> Self {
        LedgerEvent::BalanceUpdated(value)
    }
}

impl Event for LedgerEvent {
    fn event_id(&self) -> EventId {
        match self {
            LedgerEvent::AccountCreated(e) => e.event_id(),
            LedgerEvent::BalanceUpdated(e) => e.event_id(),
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::AccountCreated(e) => e.event_type(),
            LedgerEvent::BalanceUpdated(e) => e.event_type(),
        }
    }

    fn account_id(&self) -> AccountId {
        match self {
            LedgerEvent::AccountCreated(e) => e.account_id(),
            LedgerEvent::BalanceUpdated(e) => e.account_id(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::AccountCreated(e) => e.occurred_at(),
            LedgerEvent::BalanceUpdated(e) => e.occurred_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_change() -> BalanceChange {
        BalanceChange {
            account_id: AccountId::new(),
            old_balance: dec!(50.00),
            new_balance: dec!(30.00),
            delta: dec!(-20.00),
            updated_at: now_utc(),
        }
    }

    #[test]
    fn events_get_their_own_ids() {
        let account = Account::open(OwnerId::new(), Some(AccountType::Spot), now_utc());
        let first = AccountCreated::for_account(&account);
        let second = AccountCreated::for_account(&account);

        assert_eq!(first.account_id, account.id);
        assert_ne!(first.event_id, second.event_id);
        assert_ne!(*first.event_id.as_uuid(), *account.id.as_uuid());
    }

    #[test]
    fn balance_updated_carries_exact_strings() {
        let event = BalanceUpdated::from_change(&sample_change(), "debit");
        let json = serde_json::to_value(LedgerEvent::from(event)).unwrap();

        assert_eq!(json["type"], BALANCE_UPDATED);
        assert_eq!(json["old_balance"], "50.00");
        assert_eq!(json["new_balance"], "30.00");
        assert_eq!(json["delta"], "-20.00");
        assert_eq!(json["reason"], "debit");
    }

    #[test]
    fn account_type_is_omitted_when_absent() {
        let account = Account::open(OwnerId::new(), None, now_utc());
        let event = LedgerEvent::from(AccountCreated::for_account(&account));
        let json = serde_json::to_value(event).unwrap();

        assert_eq!(json["type"], ACCOUNT_CREATED);
        assert!(json.get("account_type").is_none());
    }

    #[test]
    fn partition_key_is_the_event_id() {
        let event = BalanceUpdated::from_change(&sample_change(), "credit");
        assert_eq!(event.partition_key(), event.event_id.to_string());
    }
}
