//! Process-wide tracing setup for ledger services.

pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, init, init_with_filter};
