//! Offset/limit pagination for list queries.

use crate::error::{LedgerError, LedgerResult};

/// A validated page request.
///
/// Only constructible through [`Page::new`], so storage adapters never see a
/// negative offset or an empty limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    offset: u64,
    limit: u64,
}

impl Page {
    pub fn new(offset: i64, limit: i64) -> LedgerResult<Self> {
        if offset < 0 {
            return Err(LedgerError::validation(format!(
                "offset must be >= 0 (got {offset})"
            )));
        }
        if limit <= 0 {
            return Err(LedgerError::validation(format!(
                "limit must be > 0 (got {limit})"
            )));
        }
        Ok(Self {
            offset: offset as u64,
            limit: limit as u64,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
