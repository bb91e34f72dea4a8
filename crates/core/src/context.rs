//! Per-call context: caller deadline and parent tracing span.

use std::time::{Duration, Instant};

use tracing::Span;

/// Context handed to every store and publisher operation.
///
/// - `deadline` bounds the whole operation (a transaction, or a publish
///   including its retries). `None` means "no deadline beyond the adapter's own
///   limits".
/// - `span` is the parent for the span each operation opens, which is how a
///   caller's trace context flows into the ledger without this crate knowing
///   the tracing backend.
///
/// Cancellation is expressed the usual async way: dropping the operation's
/// future abandons it.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    span: Span,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// No deadline, parented to whatever span is current.
    pub fn background() -> Self {
        Self {
            deadline: None,
            span: Span::current(),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set a deadline. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Time left before the deadline; `Some(ZERO)` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}
