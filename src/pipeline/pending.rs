//! Pending Queue
//!
//! FIFO of in-flight commands for one connection.
//!
//! ## Invariants
//! - Entries leave in exactly the order they were appended, which the client
//!   facade guarantees is the order their bytes hit the transport.
//! - Once closed, the queue accepts no new entries and every entry it held has
//!   been handed back to the caller of [`PendingQueue::close`] for resolution.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use super::Continuation;
use crate::error::{ClientError, Result};
use crate::protocol::{CommandKind, Response};

// =============================================================================
// Completion slot
// =============================================================================

/// Where a command's result goes
pub(crate) struct Completion {
    /// Feeds the caller's [`Handle`](crate::client::Handle)
    pub(crate) reply: Sender<Result<Response>>,

    /// Caller-supplied callback, if any
    pub(crate) continuation: Option<Continuation>,
}

/// Take-once holder of a command's completion
///
/// Shared between the pending entry and the caller's handle. Whoever takes the
/// completion first (reply, cancel, timeout, connection failure) resolves the
/// command; later takers get nothing.
pub struct CompletionSlot {
    completion: Mutex<Option<Completion>>,
    cancelled: AtomicBool,
}

impl CompletionSlot {
    /// Create a slot and the receiver its result will be delivered on
    pub fn new(continuation: Option<Continuation>) -> (Arc<Self>, Receiver<Result<Response>>) {
        let (reply, receiver) = bounded(1);
        let slot = Self {
            completion: Mutex::new(Some(Completion {
                reply,
                continuation,
            })),
            cancelled: AtomicBool::new(false),
        };
        (Arc::new(slot), receiver)
    }

    pub(crate) fn take(&self) -> Option<Completion> {
        self.completion.lock().take()
    }

    /// Whether the command has received its resolution
    pub fn is_resolved(&self) -> bool {
        self.completion.lock().is_none()
    }

    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// =============================================================================
// Pending entry
// =============================================================================

/// One in-flight command
pub struct PendingEntry {
    sequence: u64,
    kind: CommandKind,
    submitted_at: Instant,
    slot: Arc<CompletionSlot>,
}

impl PendingEntry {
    /// Position in submission order, starting at 1
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn slot(&self) -> &CompletionSlot {
        &self.slot
    }
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("sequence", &self.sequence)
            .field("kind", &self.kind)
            .field("resolved", &self.slot.is_resolved())
            .finish()
    }
}

// =============================================================================
// Pending queue
// =============================================================================

/// Thread-safe FIFO of pending entries, plus the connection's closed state
///
/// All state sits behind one mutex so that closing and draining is atomic
/// with respect to appends: nothing can be pushed after the drain.
pub struct PendingQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    entries: VecDeque<PendingEntry>,
    next_sequence: u64,
    closed: Option<ClientError>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                next_sequence: 1,
                closed: None,
            }),
        }
    }

    /// Append an entry for a command about to be written
    ///
    /// Returns the entry's sequence number, or the closing cause if the
    /// connection is already closed.
    pub fn push_back(&self, kind: CommandKind, slot: Arc<CompletionSlot>) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(cause) = &state.closed {
            return Err(cause.clone());
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push_back(PendingEntry {
            sequence,
            kind,
            submitted_at: Instant::now(),
            slot,
        });
        Ok(sequence)
    }

    /// Remove the oldest entry
    ///
    /// Only the correlator calls this.
    pub fn pop_front(&self) -> Option<PendingEntry> {
        self.state.lock().entries.pop_front()
    }

    /// Close the queue and hand back every entry still in it
    ///
    /// The first cause sticks; closing an already-closed queue returns nothing.
    pub fn close(&self, cause: ClientError) -> Vec<PendingEntry> {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return Vec::new();
        }
        state.closed = Some(cause);
        state.entries.drain(..).collect()
    }

    /// Why the queue was closed, if it was
    pub fn close_cause(&self) -> Option<ClientError> {
        self.state.lock().closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// How long the oldest entry has been waiting
    pub fn oldest_age(&self) -> Option<Duration> {
        self.state
            .lock()
            .entries
            .front()
            .map(|entry| entry.submitted_at.elapsed())
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
