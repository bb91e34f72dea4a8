//! `ledger-service`: the ledger's public contract over a store and a publisher.

#[cfg(feature = "redis")]
pub mod bootstrap;
pub mod service;

pub use ledger_infra::PublishMode;
pub use service::{DEFAULT_REASON, LedgerService};
