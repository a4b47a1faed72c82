//! Configuration for kvpipe
//!
//! Centralized configuration with sensible defaults.

use crate::error::{ClientError, Result};

/// Main configuration for a kvpipe connection
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Server address (host:port)
    pub server_addr: String,

    /// Connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 disables)
    pub write_timeout_ms: u64,

    /// Size of the buffer the response reader reads into (bytes)
    pub read_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Protocol Configuration
    // -------------------------------------------------------------------------
    /// Largest single frame the decoder will buffer (bytes)
    pub max_frame_size: usize,

    // -------------------------------------------------------------------------
    // Dispatch Configuration
    // -------------------------------------------------------------------------
    /// Where completion callbacks run
    pub dispatch_mode: DispatchMode,
}

/// Where completion callbacks (continuations) are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the thread that resolves the command (usually the response reader).
    /// Waiting on a handle from there fails with `ClientError::WaitOnReader`.
    Inline,

    /// On one dedicated dispatch thread per connection, in reply order,
    /// keeping caller code off the reader
    Executor,
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Executor
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6379".to_string(),
            connect_timeout_ms: 5000,
            write_timeout_ms: 5000,
            read_buffer_size: 16 * 1024,      // 16 KB
            max_frame_size: 16 * 1024 * 1024, // 16 MB
            dispatch_mode: DispatchMode::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server_addr.is_empty() {
            return Err(ClientError::Config("server address is empty".to_string()));
        }
        if self.read_buffer_size == 0 {
            return Err(ClientError::Config("read buffer size must be non-zero".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(ClientError::Config("max frame size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the server address
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the reader buffer size (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the maximum frame size (in bytes)
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set where completion callbacks run
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
