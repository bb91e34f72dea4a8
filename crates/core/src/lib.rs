//! `ledger-core`: account model and shared building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod account;
pub mod context;
pub mod error;
pub mod id;
pub mod page;

pub use account::{Account, AccountType, BalanceChange, now_utc};
pub use context::CallContext;
pub use error::{LedgerError, LedgerResult};
pub use id::{AccountId, EventId, OwnerId};
pub use page::Page;
