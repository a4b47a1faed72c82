//! Transport
//!
//! The outbound half of a connection.

use std::io::{self, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// Sends encoded commands to the server
///
/// Implementations only move bytes; ordering is the caller's job. The client
/// facade calls `send` with its writer lock held, right after appending the
/// command's pending entry.
pub trait Transport: Send {
    /// Write one encoded command, fully
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Tear the connection down; inbound delivery should stop as well
    fn shutdown(&mut self);
}

/// TCP transport (write half of a split stream)
pub struct TcpTransport {
    /// TCP stream writer (buffered, flushed per frame)
    writer: BufWriter<TcpStream>,

    /// Peer address for logging
    peer_addr: String,
}

impl TcpTransport {
    /// Wrap the write half of a connected stream
    pub fn new(stream: TcpStream, write_timeout_ms: u64) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm; pipelined commands are small
        stream.set_nodelay(true)?;

        if write_timeout_ms > 0 {
            stream.set_write_timeout(Some(Duration::from_millis(write_timeout_ms)))?;
        }

        Ok(Self {
            writer: BufWriter::new(stream),
            peer_addr,
        })
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.writer.get_ref().shutdown(Shutdown::Both) {
            // Already closed by the peer or by the reader
            tracing::debug!("Shutdown of {} returned: {}", self.peer_addr, e);
        }
    }
}
