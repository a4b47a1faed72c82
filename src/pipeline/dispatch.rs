//! Dispatch Boundary
//!
//! The point where internal correlation state meets untrusted caller code.
//!
//! Resolving a command does two things, in order:
//! 1. delivers the result to the caller's handle (cannot fail)
//! 2. invokes the caller's continuation, if one was supplied, under
//!    `catch_unwind`
//!
//! A panicking continuation is counted, logged and swallowed here. It never
//! reaches the correlator, so it cannot skip, repeat or retry a queue advance.
//!
//! In executor mode a connection has exactly one dispatch thread, so
//! continuations run one at a time in the order their replies arrived.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{unbounded, Receiver, SendError, Sender};
use parking_lot::Mutex;

use super::pending::{CompletionSlot, PendingEntry};
use super::stats::Stats;
use super::Continuation;
use crate::config::DispatchMode;
use crate::error::{ClientError, Result};
use crate::protocol::Response;

/// What happened to a resolution handed to the boundary
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Result delivered; continuation (if any) ran to completion
    Delivered,

    /// Result delivered; continuation handed to the dispatch executor
    Queued,

    /// Result delivered; continuation panicked and the fault was isolated
    Faulted(ClientError),

    /// Slot was already resolved (cancelled or timed out); nothing to do
    Discarded,
}

/// A continuation waiting for the dispatch thread
struct Job {
    sequence: Option<u64>,
    continuation: Continuation,
    result: Result<Response>,
}

/// Fault-isolating resolver for completion slots
///
/// Cheap to clone; clones share the executor and counters.
#[derive(Clone)]
pub struct DispatchBoundary {
    inner: Arc<BoundaryInner>,
}

struct BoundaryInner {
    stats: Arc<Stats>,
    executor: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,

    /// Thread draining replies into the correlator, when the client owns one
    reader_id: Mutex<Option<ThreadId>>,
}

impl DispatchBoundary {
    /// Create a boundary, spawning the dispatch thread in executor mode
    pub fn new(mode: DispatchMode, stats: Arc<Stats>) -> Result<Self> {
        let (executor, worker) = match mode {
            DispatchMode::Inline => (None, None),
            DispatchMode::Executor => {
                let (sender, jobs) = unbounded::<Job>();
                let worker_stats = Arc::clone(&stats);
                let worker = thread::Builder::new()
                    .name("kvpipe-dispatch".to_string())
                    .spawn(move || run_worker(jobs, worker_stats))?;
                (Some(sender), Some(worker))
            }
        };

        let worker_id = worker.as_ref().map(|w| w.thread().id());

        Ok(Self {
            inner: Arc::new(BoundaryInner {
                stats,
                executor: Mutex::new(executor),
                worker: Mutex::new(worker),
                worker_id,
                reader_id: Mutex::new(None),
            }),
        })
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.inner.stats
    }

    /// Record the thread that feeds replies to the correlator
    pub(crate) fn set_reader_thread(&self, id: ThreadId) {
        *self.inner.reader_id.lock() = Some(id);
    }

    /// Whether the caller is the reader thread, where blocking on a reply
    /// can never succeed
    pub fn on_reader_thread(&self) -> bool {
        *self.inner.reader_id.lock() == Some(thread::current().id())
    }

    /// Resolve a popped (or drained) pending entry
    ///
    /// If the caller already gave up on the command, the result is dropped
    /// and counted as discarded.
    pub fn resolve(&self, entry: PendingEntry, result: Result<Response>) -> DispatchOutcome {
        let outcome = self.complete(Some(entry.sequence()), entry.slot(), result);
        if let DispatchOutcome::Discarded = outcome {
            self.inner.stats.record_discarded();
            tracing::trace!(sequence = entry.sequence(), "Slot already resolved, result discarded");
        }
        outcome
    }

    /// Resolve a completion slot, at most once
    pub fn complete(
        &self,
        sequence: Option<u64>,
        slot: &CompletionSlot,
        result: Result<Response>,
    ) -> DispatchOutcome {
        let completion = match slot.take() {
            Some(completion) => completion,
            None => return DispatchOutcome::Discarded,
        };

        self.inner.stats.record_resolution(&result);

        let continuation = match completion.continuation {
            Some(continuation) => continuation,
            None => {
                // The handle may have been dropped; that's fine
                let _ = completion.reply.try_send(result);
                return DispatchOutcome::Delivered;
            }
        };
        let _ = completion.reply.try_send(result.clone());

        self.invoke(sequence, continuation, result)
    }

    fn invoke(
        &self,
        sequence: Option<u64>,
        continuation: Continuation,
        result: Result<Response>,
    ) -> DispatchOutcome {
        let executor = self.inner.executor.lock().clone();

        let job = Job {
            sequence,
            continuation,
            result,
        };
        let job = match executor {
            Some(sender) => match sender.send(job) {
                Ok(()) => return DispatchOutcome::Queued,
                // Dispatch thread gone: run it here rather than lose it
                Err(SendError(job)) => job,
            },
            None => job,
        };

        match invoke_isolated(&self.inner.stats, job.sequence, job.continuation, job.result) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(fault) => DispatchOutcome::Faulted(fault),
        }
    }

    /// Stop accepting executor jobs and wait for queued ones to finish
    ///
    /// Later resolutions run inline. Safe to call from the dispatch thread (it
    /// will not join itself) and safe to call more than once.
    pub fn shutdown(&self) {
        drop(self.inner.executor.lock().take());

        if self.inner.worker_id == Some(thread::current().id()) {
            return;
        }

        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("Dispatch thread panicked outside the fault boundary");
            }
        }
    }
}

/// Run a continuation, converting a panic into `ContinuationFault`
///
/// The fault is counted and logged; it is returned for reporting only.
pub fn invoke_isolated(
    stats: &Stats,
    sequence: Option<u64>,
    continuation: Continuation,
    result: Result<Response>,
) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(move || continuation(result))) {
        Ok(()) => Ok(()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            stats.record_continuation_fault();
            tracing::error!(
                ?sequence,
                "Completion callback panicked, fault isolated: {}",
                message
            );
            Err(ClientError::ContinuationFault { sequence, message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_worker(jobs: Receiver<Job>, stats: Arc<Stats>) {
    while let Ok(job) = jobs.recv() {
        let _ = invoke_isolated(&stats, job.sequence, job.continuation, job.result);
    }
    tracing::debug!("Dispatch thread exiting");
}
