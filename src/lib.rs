//! # kvpipe
//!
//! A pipelined client for Redis-like key-value servers with:
//! - Many concurrent submitters sharing one connection
//! - Strict FIFO pairing of anonymous replies with commands
//! - Fault isolation around per-command completion callbacks
//! - Fail-fast draining when the connection breaks or desynchronizes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Client (facade)                          │
//! │              (Many concurrent submitters)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ append + send (one critical section)
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │PendingQueue │          │  Transport  │
//!   │   (FIFO)    │          │   (write)   │
//!   └──────┬──────┘          └──────┬──────┘
//!          │ pop_front              │ wire
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Correlator  │◀─────────│   Reader    │
//!   │   (one)     │  replies │  (thread)   │
//!   └──────┬──────┘          └─────────────┘
//!          ▼
//!   ┌─────────────────┐
//!   │DispatchBoundary │
//!   │ (catch_unwind)  │
//!   └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod pipeline;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ClientError, Result};
pub use config::{Config, DispatchMode};
pub use client::{Client, Handle};
pub use protocol::{Command, CommandKind, Response};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvpipe
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
