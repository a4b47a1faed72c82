//! Response Reader
//!
//! The inbound half of a connection: reads bytes, frames them into replies,
//! and feeds the correlator. Runs on its own thread, one per connection,
//! which makes it the single serialized delivery path the correlator needs.

use std::io::{ErrorKind, Read};
use std::net::{Shutdown, TcpStream};

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::pipeline::Correlator;
use crate::protocol::ResponseDecoder;

/// Drives a connection's correlator from its socket
pub struct ResponseReader {
    /// TCP stream (read half)
    stream: TcpStream,

    /// Buffers partial frames
    decoder: ResponseDecoder,

    correlator: Correlator,

    read_buffer_size: usize,

    /// Peer address for logging
    peer_addr: String,
}

impl ResponseReader {
    pub fn new(stream: TcpStream, correlator: Correlator, config: &Config) -> Self {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            stream,
            decoder: ResponseDecoder::new(config.max_frame_size),
            correlator,
            read_buffer_size: config.read_buffer_size,
            peer_addr,
        }
    }

    /// Read until the connection ends (blocking)
    ///
    /// Returns `Ok(())` when the connection was closed locally, otherwise the
    /// fault that ended it. Every pending command has been resolved by the
    /// time this returns.
    pub fn run(mut self) -> Result<()> {
        tracing::debug!("Response reader started for {}", self.peer_addr);

        let mut buf = vec![0u8; self.read_buffer_size];
        let cause = loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => {
                    break ClientError::TransportFault(format!(
                        "connection to {} closed by peer",
                        self.peer_addr
                    ))
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    break ClientError::TransportFault(format!(
                        "read from {} failed: {}",
                        self.peer_addr, e
                    ))
                }
            };

            self.decoder.feed(&buf[..n]);
            if let Err(cause) = self.drain_decoder() {
                break cause;
            }
        };

        // Stop the write half too; nothing sent from here on can be paired
        let _ = self.stream.shutdown(Shutdown::Both);

        match self.correlator.on_closed(cause) {
            ClientError::ConnectionClosed => {
                tracing::debug!(
                    "Response reader for {} stopped after local close ({} replies matched)",
                    self.peer_addr,
                    self.correlator.matched()
                );
                Ok(())
            }
            fault => {
                tracing::error!("Connection to {} failed: {}", self.peer_addr, fault);
                Err(fault)
            }
        }
    }

    /// Hand every complete reply in the decoder to the correlator
    fn drain_decoder(&mut self) -> Result<()> {
        while let Some(response) = self.decoder.decode_next()? {
            tracing::trace!("Received reply from {}: {:?}", self.peer_addr, response);
            self.correlator.on_response(response)?;
        }
        Ok(())
    }
}
