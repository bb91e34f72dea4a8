//! Ledger error model.

use thiserror::Error;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Store and publisher failures are translated into this taxonomy at their
/// boundary and then travel through the service unchanged. The only variant the
/// service recovers from on its own is [`LedgerError::Publish`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No account matches the requested identifier.
    #[error("account not found")]
    NotFound,

    /// A storage constraint was violated while creating an account.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller input was malformed (bad identifier, negative pagination, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Any other persistence failure, including deadlines and pool timeouts.
    #[error("storage error: {0}")]
    Storage(String),

    /// Event delivery gave up (retries exhausted or circuit open).
    #[error("publish error: {0}")]
    Publish(String),
}

impl LedgerError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// HTTP status an outer transport should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::NotFound => 404,
            LedgerError::Validation(_) | LedgerError::Conflict(_) => 400,
            LedgerError::Storage(_) | LedgerError::Publish(_) => 500,
        }
    }
}
