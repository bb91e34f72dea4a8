//! In-memory broker transport for tests/dev.

use std::sync::{Mutex, MutexGuard};

use crate::envelope::BrokerMessage;
use crate::transport::{BrokerTransport, TransportError};

#[derive(Debug, Default)]
struct State {
    delivered: Vec<BrokerMessage>,
    attempts: u64,
    down: bool,
    fail_next: u32,
    closed: bool,
}

/// Records every message it accepts.
///
/// - No IO
/// - `set_down(true)` makes every send fail (broker outage)
/// - `fail_next(n)` makes only the next `n` sends fail (transient errors)
/// - `attempts()` counts sends that reached the "broker", successful or not
#[derive(Debug)]
pub struct InMemoryTransport {
    topic: String,
    state: Mutex<State>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new("ledger:accounts:events")
    }
}

impl InMemoryTransport {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.lock().down = down;
    }

    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    pub fn delivered(&self) -> Vec<BrokerMessage> {
        self.lock().delivered.clone()
    }

    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl BrokerTransport for InMemoryTransport {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, message: &BrokerMessage) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }

        state.attempts += 1;

        if state.down {
            return Err(TransportError::Unavailable("broker is down".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::Unavailable("transient broker error".to_string()));
        }

        state.delivered.push(message.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().closed = true;
        Ok(())
    }
}
