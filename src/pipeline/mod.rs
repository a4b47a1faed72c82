//! Pipeline Module
//!
//! Request/response correlation for one pipelined connection.
//!
//! ## Responsibilities
//! - Keep one pending entry per in-flight command, in wire order
//! - Pair each reply with the oldest pending entry
//! - Resolve every command exactly once
//! - Isolate panicking completion callbacks from the correlation state
//!
//! ## Flow
//! ```text
//!  submitters ──push_back──▶ ┌──────────────┐ ──pop_front──▶ Correlator
//!   (many)                   │ PendingQueue │                 (one)
//!                            └──────────────┘                   │
//!                                                       DispatchBoundary
//!                                                     (handle + continuation)
//! ```

mod correlator;
mod dispatch;
mod pending;
mod stats;

use crate::error::Result;
use crate::protocol::Response;

pub use correlator::Correlator;
pub use dispatch::{invoke_isolated, DispatchBoundary, DispatchOutcome};
pub use pending::{CompletionSlot, PendingEntry, PendingQueue};
pub use stats::{Stats, StatsSnapshot};

/// Caller-supplied completion callback, invoked exactly once
pub type Continuation = Box<dyn FnOnce(Result<Response>) + Send + 'static>;
