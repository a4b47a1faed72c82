//! Client Module
//!
//! The public submission API. A `Client` is cheap to clone and every clone
//! shares one connection, so any number of threads can pipeline commands
//! over it concurrently.
//!
//! ## Ordering
//! Appending a command's pending entry and writing its bytes happen inside a
//! single critical section (the writer lock). Append order is therefore wire
//! order, which is the order the server replies in, for every command no
//! matter how many threads are submitting.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::network::{ResponseReader, TcpTransport, Transport};
use crate::pipeline::{
    CompletionSlot, Continuation, Correlator, DispatchBoundary, DispatchOutcome, PendingQueue,
    Stats, StatsSnapshot,
};
use crate::protocol::{encode_command, Command, Response};

/// A pipelined connection to a key-value server
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,

    /// Serializes append+send; also owns the outbound transport
    writer: Mutex<Box<dyn Transport>>,

    queue: Arc<PendingQueue>,

    boundary: DispatchBoundary,

    stats: Arc<Stats>,

    /// Response reader thread, when the client owns its socket
    reader: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Client {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Connect to `config.server_addr` and start the response reader
    pub fn connect(config: &Config) -> Result<Self> {
        config.validate()?;

        let addr = config
            .server_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ClientError::Config(format!("could not resolve {}", config.server_addr))
            })?;

        let stream = TcpStream::connect_timeout(
            &addr,
            Duration::from_millis(config.connect_timeout_ms),
        )?;
        let transport = TcpTransport::new(stream.try_clone()?, config.write_timeout_ms)?;

        let (client, correlator) = Self::with_transport(transport, config)?;

        let reader = ResponseReader::new(stream, correlator, config);
        let handle = thread::Builder::new()
            .name("kvpipe-reader".to_string())
            .spawn(move || reader.run())?;
        client.inner.boundary.set_reader_thread(handle.thread().id());
        *client.inner.reader.lock() = Some(handle);

        tracing::debug!("Connected to {}", addr);
        Ok(client)
    }

    /// Build a client over a caller-supplied transport
    ///
    /// The caller drives the returned correlator with the replies the
    /// transport receives, from one place, in wire order.
    pub fn with_transport<T>(transport: T, config: &Config) -> Result<(Self, Correlator)>
    where
        T: Transport + 'static,
    {
        config.validate()?;

        let stats = Arc::new(Stats::new());
        let boundary = DispatchBoundary::new(config.dispatch_mode, Arc::clone(&stats))?;
        let queue = Arc::new(PendingQueue::new());
        let correlator = Correlator::new(Arc::clone(&queue), boundary.clone());

        let client = Self {
            inner: Arc::new(ClientInner {
                config: config.clone(),
                writer: Mutex::new(Box::new(transport)),
                queue,
                boundary,
                stats,
                reader: Mutex::new(None),
            }),
        };
        Ok((client, correlator))
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Pipeline a command; the result arrives on the returned handle
    pub fn submit(&self, command: Command) -> Handle {
        self.submit_inner(command, None)
    }

    /// Pipeline a command with a completion callback
    ///
    /// The callback runs exactly once, with the reply or the error that
    /// resolved the command. A panic inside it is isolated: it is logged and
    /// counted in [`StatsSnapshot::continuation_faults`] and affects no other
    /// command.
    pub fn submit_with<F>(&self, command: Command, continuation: F) -> Handle
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        self.submit_inner(command, Some(Box::new(continuation)))
    }

    fn submit_inner(&self, command: Command, continuation: Option<Continuation>) -> Handle {
        let inner = &self.inner;
        let (slot, receiver) = CompletionSlot::new(continuation);

        if let Err(e) = command.validate() {
            inner.boundary.complete(None, &slot, Err(e));
            return Handle::new(receiver, slot, inner.boundary.clone(), None);
        }

        let frame = encode_command(&command);

        let mut writer = inner.writer.lock();
        let sequence = match inner.queue.push_back(command.kind(), Arc::clone(&slot)) {
            Ok(sequence) => sequence,
            Err(cause) => {
                drop(writer);
                inner.boundary.complete(None, &slot, Err(cause));
                return Handle::new(receiver, slot, inner.boundary.clone(), None);
            }
        };
        inner.stats.record_submitted();

        if let Err(e) = writer.send(&frame) {
            let cause = ClientError::TransportFault(format!("write failed: {}", e));
            tracing::error!("{}; failing all pending commands", cause);

            writer.shutdown();
            let drained = inner.queue.close(cause.clone());
            drop(writer);

            let effective = inner.queue.close_cause().unwrap_or(cause);
            for entry in drained {
                inner.boundary.resolve(entry, Err(effective.clone()));
            }
        } else {
            drop(writer);
            tracing::trace!(sequence, verb = command.kind().verb(), "Command submitted");
        }

        Handle::new(receiver, slot, inner.boundary.clone(), Some(sequence))
    }

    // =========================================================================
    // Blocking conveniences
    // =========================================================================

    /// GET key; `None` when the key does not exist
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.submit(Command::get(key)).wait()?.into_result()? {
            Response::Nil => Ok(None),
            Response::Bulk(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| ClientError::Protocol("GET reply is not valid UTF-8".to_string())),
            other => Err(unexpected("GET", &other)),
        }
    }

    /// SET key value
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        match self.submit(Command::set(key, value)).wait()?.into_result()? {
            Response::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    /// DEL key; returns the number of keys removed
    pub fn del(&self, key: &str) -> Result<i64> {
        match self.submit(Command::del(key)).wait()?.into_result()? {
            Response::Integer(n) => Ok(n),
            other => Err(unexpected("DEL", &other)),
        }
    }

    /// PING
    pub fn ping(&self) -> Result<()> {
        match self.submit(Command::ping()).wait()?.into_result()? {
            Response::Simple(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    // =========================================================================
    // Lifecycle & introspection
    // =========================================================================

    /// Close the connection, failing every pending command
    ///
    /// Returns the fault that killed the connection if it died before this
    /// call (transport failure, desynchronization, malformed frame).
    pub fn close(&self) -> Result<()> {
        self.inner.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Why the connection closed, if it has
    pub fn close_cause(&self) -> Option<ClientError> {
        self.inner.queue.close_cause()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Commands written but not yet answered
    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// How long the oldest unanswered command has been waiting
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.inner.queue.oldest_age()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl ClientInner {
    fn shutdown(&self) -> Result<()> {
        let drained = {
            let mut writer = self.writer.lock();
            let drained = self.queue.close(ClientError::ConnectionClosed);
            writer.shutdown();
            drained
        };
        for entry in drained {
            self.boundary.resolve(entry, Err(ClientError::ConnectionClosed));
        }

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if reader.thread().id() == thread::current().id() {
                // Closing from an inline continuation; the reader exits on its own
            } else if reader.join().is_err() {
                tracing::error!("Response reader panicked");
            }
        }

        self.boundary.shutdown();

        match self.queue.close_cause() {
            None | Some(ClientError::ConnectionClosed) => Ok(()),
            Some(fault) => Err(fault),
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::debug!("Connection had failed before drop: {}", e);
        }
    }
}

fn unexpected(verb: &str, reply: &Response) -> ClientError {
    ClientError::Protocol(format!("Unexpected {} reply: {:?}", verb, reply))
}

// =============================================================================
// Handle
// =============================================================================

/// A submitted command's result, to await or cancel
///
/// Cancelling (or timing out) resolves the caller immediately but leaves the
/// command's pending entry in place: its reply still has to arrive and be
/// consumed, or every later pairing would shift by one.
pub struct Handle {
    receiver: Receiver<Result<Response>>,
    slot: Arc<CompletionSlot>,
    boundary: DispatchBoundary,
    sequence: Option<u64>,
}

impl Handle {
    fn new(
        receiver: Receiver<Result<Response>>,
        slot: Arc<CompletionSlot>,
        boundary: DispatchBoundary,
        sequence: Option<u64>,
    ) -> Self {
        Self {
            receiver,
            slot,
            boundary,
            sequence,
        }
    }

    /// Position in the connection's submission order; `None` if the command
    /// was rejected before reaching the queue
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Block until the command is resolved
    ///
    /// On the response reader thread (an inline continuation) this never
    /// blocks: it returns the result if it is already there, otherwise
    /// `ClientError::WaitOnReader`.
    pub fn wait(self) -> Result<Response> {
        if let Some(result) = self.refuse_on_reader() {
            return result;
        }
        self.receiver
            .recv()
            .unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Block up to `timeout`
    ///
    /// On timeout the command is resolved with `ClientError::Timeout` (its
    /// continuation sees the same) and the late reply will be discarded.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Response> {
        if let Some(result) = self.refuse_on_reader() {
            return result;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let outcome =
                    self.boundary
                        .complete(self.sequence, &self.slot, Err(ClientError::Timeout));
                match outcome {
                    // The reply took the slot first and is being delivered
                    DispatchOutcome::Discarded => self
                        .receiver
                        .recv()
                        .unwrap_or(Err(ClientError::ConnectionClosed)),
                    _ => Err(ClientError::Timeout),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionClosed),
        }
    }

    /// Only the reader can deliver replies, so it must never wait for one
    fn refuse_on_reader(&self) -> Option<Result<Response>> {
        if !self.boundary.on_reader_thread() {
            return None;
        }
        Some(self.try_take().unwrap_or(Err(ClientError::WaitOnReader)))
    }

    /// Take the result if it is already available
    ///
    /// The result can only be taken once; a later `wait` would report the
    /// connection as closed.
    pub fn try_take(&self) -> Option<Result<Response>> {
        self.receiver.try_recv().ok()
    }

    /// Cancel the command
    ///
    /// Returns `true` if this call resolved it (with `ClientError::Cancelled`),
    /// `false` if it had already been resolved.
    pub fn cancel(&self) -> bool {
        let outcome =
            self.boundary
                .complete(self.sequence, &self.slot, Err(ClientError::Cancelled));
        if matches!(outcome, DispatchOutcome::Discarded) {
            return false;
        }
        self.slot.mark_cancelled();
        tracing::trace!(sequence = ?self.sequence, "Command cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("sequence", &self.sequence)
            .field("resolved", &self.slot.is_resolved())
            .field("cancelled", &self.slot.is_cancelled())
            .finish()
    }
}
