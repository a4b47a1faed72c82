//! Error types for kvpipe
//!
//! Provides a unified error type for all client operations.
//!
//! The error is `Clone` because a single connection-level cause (transport
//! failure, desynchronization, local close) resolves every pending command.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type for kvpipe operations
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Connection Errors (fatal for the connection)
    // -------------------------------------------------------------------------
    #[error("Transport fault: {0}")]
    TransportFault(String),

    #[error("Protocol desynchronization: {0}")]
    ProtocolDesynchronization(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    ConnectionClosed,

    // -------------------------------------------------------------------------
    // Per-command Errors
    // -------------------------------------------------------------------------
    #[error("Completion callback panicked: {message}")]
    ContinuationFault {
        sequence: Option<u64>,
        message: String,
    },

    #[error("Command cancelled")]
    Cancelled,

    #[error("Timed out waiting for response")]
    Timeout,

    #[error("Cannot wait for a reply on the response reader thread")]
    WaitOnReader,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Server error: {0}")]
    Server(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl ClientError {
    /// Whether this error terminates the connection it was raised on
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::TransportFault(_)
                | ClientError::ProtocolDesynchronization(_)
                | ClientError::Protocol(_)
                | ClientError::ConnectionClosed
        )
    }
}
