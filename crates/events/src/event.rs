use chrono::{DateTime, Utc};

use ledger_core::{AccountId, EventId};

/// A ledger domain event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **self-identifying** (`event_id` lets consumers deduplicate)
/// - a one-way output: nothing in the ledger reads them back
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Unique id of this event, independent of the account id.
    fn event_id(&self) -> EventId;

    /// Stable event name (e.g. "balance.updated").
    fn event_type(&self) -> &'static str;

    /// The account the event describes.
    fn account_id(&self) -> AccountId;

    /// When the event was constructed (UTC).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Broker partition/ordering key.
    ///
    /// The event's own id: spreads messages evenly and gives no per-account
    /// ordering.
    fn partition_key(&self) -> String {
        self.event_id().to_string()
    }
}
