//! Connection counters
//!
//! Updated by the client facade (submissions) and the dispatch boundary
//! (resolutions, isolated faults). Readers take a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ClientError, Result};
use crate::protocol::Response;

/// Live counters for one connection
#[derive(Debug, Default)]
pub struct Stats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    discarded: AtomicU64,
    continuation_faults: AtomicU64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Commands appended to the pending queue and written
    pub submitted: u64,

    /// Commands resolved with a reply
    pub completed: u64,

    /// Commands resolved with an error (invalid, transport, desync, closed)
    pub failed: u64,

    /// Commands resolved by cancel or wait timeout
    pub cancelled: u64,

    /// Pending entries whose result found the slot already resolved
    /// (a late reply to a cancelled or timed-out command)
    pub discarded: u64,

    /// Completion callbacks that panicked and were isolated
    pub continuation_faults: u64,
}

impl StatsSnapshot {
    /// Commands that have received their single resolution
    pub fn resolved(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            cancelled: self.cancelled.load(Ordering::Acquire),
            discarded: self.discarded.load(Ordering::Acquire),
            continuation_faults: self.continuation_faults.load(Ordering::Acquire),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_resolution(&self, result: &Result<Response>) {
        let counter = match result {
            Ok(_) => &self.completed,
            Err(ClientError::Cancelled) | Err(ClientError::Timeout) => &self.cancelled,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_continuation_fault(&self) {
        self.continuation_faults.fetch_add(1, Ordering::AcqRel);
    }
}
