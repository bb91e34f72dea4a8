use serde::{Deserialize, Serialize};

use crate::domain::LedgerEvent;
use crate::event::Event;
use crate::publisher::PublishError;

/// A key + value message as handed to the broker.
///
/// - `key` is the event id (the partition/ordering key)
/// - `event_type` duplicates the payload tag so consumers can route without
///   parsing the value
/// - `value` is the JSON encoding of the tagged [`LedgerEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub key: String,
    pub event_type: String,
    pub value: String,
}

impl BrokerMessage {
    pub fn encode(event: &LedgerEvent) -> Result<Self, PublishError> {
        let value =
            serde_json::to_string(event).map_err(|e| PublishError::Encode(e.to_string()))?;

        Ok(Self {
            key: event.partition_key(),
            event_type: event.event_type().to_string(),
            value,
        })
    }

    pub fn decode(&self) -> Result<LedgerEvent, serde_json::Error> {
        serde_json::from_str(&self.value)
    }
}
