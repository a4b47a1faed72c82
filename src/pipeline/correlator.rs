//! Correlator
//!
//! Pairs each inbound reply with the oldest pending command.
//!
//! The protocol carries no request ids, so arrival order is the only link
//! between a reply and its command. One correlator exists per connection and
//! its methods take `&mut self`: replies are processed one at a time, and the
//! next pop cannot start before the current entry has been handed to the
//! dispatch boundary and control has come back.

use std::sync::Arc;

use super::dispatch::DispatchBoundary;
use super::pending::PendingQueue;
use crate::error::{ClientError, Result};
use crate::protocol::Response;

/// Single owner of the pop side of a connection's pending queue
pub struct Correlator {
    queue: Arc<PendingQueue>,
    boundary: DispatchBoundary,
    matched: u64,
}

impl Correlator {
    pub(crate) fn new(queue: Arc<PendingQueue>, boundary: DispatchBoundary) -> Self {
        Self {
            queue,
            boundary,
            matched: 0,
        }
    }

    /// Match a reply to the oldest pending command and dispatch it
    ///
    /// An error means the connection is finished: either it was already
    /// closed, or the reply had no pending command (desynchronization). In the
    /// latter case every remaining entry has been failed before returning.
    pub fn on_response(&mut self, response: Response) -> Result<()> {
        let entry = match self.queue.pop_front() {
            Some(entry) => entry,
            None => {
                if let Some(cause) = self.queue.close_cause() {
                    return Err(cause);
                }

                let cause = ClientError::ProtocolDesynchronization(format!(
                    "reply #{} arrived with no pending command",
                    self.matched + 1
                ));
                tracing::error!("{}; closing connection", cause);
                return Err(self.on_closed(cause));
            }
        };

        self.matched += 1;
        tracing::trace!(
            sequence = entry.sequence(),
            kind = ?entry.kind(),
            elapsed_us = entry.submitted_at().elapsed().as_micros() as u64,
            "Reply matched"
        );

        self.boundary.resolve(entry, Ok(response));
        Ok(())
    }

    /// Fail every pending command with `cause` and close the queue
    ///
    /// Returns the cause the queue ended up closed with, which is an earlier
    /// one if the queue was already closed.
    pub fn on_closed(&mut self, cause: ClientError) -> ClientError {
        let drained = self.queue.close(cause.clone());
        let effective = self.queue.close_cause().unwrap_or(cause);

        if !drained.is_empty() {
            tracing::warn!(
                "Failing {} pending commands: {}",
                drained.len(),
                effective
            );
        }
        for entry in drained {
            self.boundary.resolve(entry, Err(effective.clone()));
        }

        effective
    }

    /// Replies matched so far
    pub fn matched(&self) -> u64 {
        self.matched
    }

    /// Commands still waiting for a reply
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
