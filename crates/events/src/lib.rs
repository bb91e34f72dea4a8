//! Ledger events and their delivery to the message broker.
//!
//! - [`domain`]: the two event payloads (`account.created`, `balance.updated`)
//! - [`envelope`]: the wire form written to the broker
//! - [`transport`]: a single-attempt broker connection
//! - [`ResilientPublisher`]: retry + circuit breaking on top of a transport

pub mod breaker;
pub mod domain;
pub mod envelope;
pub mod event;
pub mod in_memory;
pub mod publisher;
pub mod resilient;
pub mod retry;
pub mod transport;

pub use breaker::{BreakerSettings, BreakerState, CircuitBreaker, Counts, Permit};
pub use domain::{ACCOUNT_CREATED, AccountCreated, BALANCE_UPDATED, BalanceUpdated, LedgerEvent};
pub use envelope::BrokerMessage;
pub use event::Event;
pub use in_memory::InMemoryTransport;
pub use publisher::{EventPublisher, PublishError};
pub use resilient::ResilientPublisher;
pub use retry::RetryPolicy;
pub use transport::{BrokerTransport, TransportError};
