//! Protocol codec
//!
//! RESP2 encoding and decoding.
//!
//! ## Wire Format
//!
//! ### Request (Command) Format
//! Every command is an array of bulk strings, verb first:
//! ```text
//! *3\r\n $3\r\nSET\r\n $1\r\nk\r\n $1\r\nv\r\n
//! ```
//!
//! ### Reply Types
//! ```text
//! ┌────────┬──────────────────────────────────────────┐
//! │ Prefix │ Meaning                                  │
//! ├────────┼──────────────────────────────────────────┤
//! │   +    │ simple string, up to CRLF                │
//! │   -    │ error string, up to CRLF                 │
//! │   :    │ signed integer                           │
//! │   $    │ bulk: length CRLF bytes CRLF ($-1 = nil) │
//! │   *    │ array: count CRLF elements (*-1 = nil)   │
//! └────────┴──────────────────────────────────────────┘
//! ```
//!
//! Partial frames stay buffered in [`ResponseDecoder`] until complete; the
//! correlator only ever sees whole replies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Command, CommandKind, Response};
use crate::error::{ClientError, Result};

/// Default maximum frame size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Arrays nested deeper than this are rejected
const MAX_NESTING_DEPTH: usize = 32;

const CRLF: &[u8] = b"\r\n";

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(command: &Command) -> Bytes {
    let args = command.args();
    let payload_len: usize = args.iter().map(|a| a.len() + 16).sum();

    let mut buf = BytesMut::with_capacity(16 + payload_len);
    put_header(&mut buf, b'*', args.len() as i64);
    for arg in args {
        put_header(&mut buf, b'$', arg.len() as i64);
        buf.put_slice(arg);
        buf.put_slice(CRLF);
    }
    buf.freeze()
}

/// Decode one command from the front of `buf`
///
/// Returns `Ok(None)` when the buffer holds only part of a frame. Used by
/// server-side tooling; the client itself never decodes commands.
pub fn decode_command(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Command>> {
    let (frame, consumed) = match parse_frame(buf, max_frame_size, 0)? {
        Some(parsed) => parsed,
        None => return Ok(None),
    };
    buf.advance(consumed);

    let items = match frame {
        Response::Array(items) if !items.is_empty() => items,
        other => {
            return Err(ClientError::Protocol(format!(
                "Expected command array, got {:?}",
                other
            )))
        }
    };

    let mut args = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Response::Bulk(bytes) => {
                let arg = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    ClientError::Protocol("Command argument is not valid UTF-8".to_string())
                })?;
                args.push(arg);
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "Command arguments must be bulk strings, got {:?}",
                    other
                )))
            }
        }
    }

    let mut args = args.into_iter();
    let verb = args.next().unwrap_or_default();
    let kind = CommandKind::from_verb(&verb)
        .ok_or_else(|| ClientError::Protocol(format!("Unknown command: {}", verb)))?;
    let key = args.next();
    let value = args.next();
    if args.next().is_some() {
        return Err(ClientError::Protocol(format!(
            "{} command: too many arguments",
            kind.verb()
        )));
    }

    Command::from_parts(kind, key, value)
        .map(Some)
        .map_err(|e| ClientError::Protocol(e.to_string()))
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a reply
pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_response(&mut buf, response);
    buf.to_vec()
}

fn put_response(buf: &mut BytesMut, response: &Response) {
    match response {
        Response::Simple(s) => put_line(buf, b'+', s.as_bytes()),
        Response::Error(s) => put_line(buf, b'-', s.as_bytes()),
        Response::Integer(n) => put_header(buf, b':', *n),
        Response::Bulk(bytes) => {
            put_header(buf, b'$', bytes.len() as i64);
            buf.put_slice(bytes);
            buf.put_slice(CRLF);
        }
        Response::Nil => put_header(buf, b'$', -1),
        Response::Array(items) => {
            put_header(buf, b'*', items.len() as i64);
            for item in items {
                put_response(buf, item);
            }
        }
    }
}

fn put_header(buf: &mut BytesMut, prefix: u8, n: i64) {
    put_line(buf, prefix, n.to_string().as_bytes());
}

fn put_line(buf: &mut BytesMut, prefix: u8, line: &[u8]) {
    buf.put_u8(prefix);
    buf.put_slice(line);
    buf.put_slice(CRLF);
}

/// Decode one reply from a complete byte slice
///
/// Unlike [`ResponseDecoder`], an incomplete frame is an error here.
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    match parse_frame(bytes, MAX_FRAME_SIZE, 0)? {
        Some((response, _)) => Ok(response),
        None => Err(ClientError::Protocol(format!(
            "Incomplete response frame ({} bytes)",
            bytes.len()
        ))),
    }
}

// =============================================================================
// Streaming decoder
// =============================================================================

/// Buffers inbound bytes and yields complete replies in wire order
#[derive(Debug)]
pub struct ResponseDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl ResponseDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Append bytes read from the transport
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete reply, or `None` if more bytes are needed
    ///
    /// An error means the stream can no longer be framed.
    pub fn decode_next(&mut self) -> Result<Option<Response>> {
        match parse_frame(&self.buffer, self.max_frame_size, 0)? {
            Some((response, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

// =============================================================================
// Frame parser
// =============================================================================

/// Parse a frame from the start of `buf`
///
/// Returns the frame and the number of bytes it occupies, or `None` if the
/// buffer ends before the frame does.
fn parse_frame(buf: &[u8], max_frame_size: usize, depth: usize) -> Result<Option<(Response, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if depth > MAX_NESTING_DEPTH {
        return Err(ClientError::Protocol(format!(
            "Arrays nested deeper than {}",
            MAX_NESTING_DEPTH
        )));
    }

    let line_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos + 1,
        None => {
            if buf.len() > max_frame_size {
                return Err(ClientError::Protocol(format!(
                    "Frame header exceeds {} bytes",
                    max_frame_size
                )));
            }
            return Ok(None);
        }
    };
    let line = &buf[1..line_end];
    let header_len = line_end + CRLF.len();

    match buf[0] {
        b'+' => Ok(Some((Response::Simple(parse_text(line)?), header_len))),
        b'-' => Ok(Some((Response::Error(parse_text(line)?), header_len))),
        b':' => Ok(Some((Response::Integer(parse_int(line)?), header_len))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Response::Nil, header_len)));
            }
            if len < 0 {
                return Err(ClientError::Protocol(format!("Invalid bulk length: {}", len)));
            }
            let len = len as usize;
            if len > max_frame_size {
                return Err(ClientError::Protocol(format!(
                    "Bulk too large: {} bytes (max {})",
                    len, max_frame_size
                )));
            }

            let total_len = header_len + len + CRLF.len();
            if buf.len() < total_len {
                return Ok(None);
            }
            if &buf[header_len + len..total_len] != CRLF {
                return Err(ClientError::Protocol(
                    "Bulk payload not terminated by CRLF".to_string(),
                ));
            }

            let payload = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
            Ok(Some((Response::Bulk(payload), total_len)))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count == -1 {
                return Ok(Some((Response::Nil, header_len)));
            }
            if count < 0 {
                return Err(ClientError::Protocol(format!("Invalid array length: {}", count)));
            }
            // Every element takes at least three bytes
            if count as u64 > max_frame_size as u64 {
                return Err(ClientError::Protocol(format!(
                    "Array too large: {} elements (max frame {} bytes)",
                    count, max_frame_size
                )));
            }

            let mut items = Vec::with_capacity((count as usize).min(1024));
            let mut pos = header_len;
            for _ in 0..count {
                match parse_frame(&buf[pos..], max_frame_size, depth + 1)? {
                    Some((item, used)) => {
                        items.push(item);
                        pos += used;
                    }
                    // The frame runs past the end of the buffer
                    None if buf.len() > max_frame_size => return Err(oversized(max_frame_size)),
                    None => return Ok(None),
                }
                if pos > max_frame_size {
                    return Err(oversized(max_frame_size));
                }
            }
            Ok(Some((Response::Array(items), pos)))
        }
        other => Err(ClientError::Protocol(format!(
            "Unknown frame prefix: 0x{:02x}",
            other
        ))),
    }
}

fn oversized(max_frame_size: usize) -> ClientError {
    ClientError::Protocol(format!("Array frame exceeds {} bytes", max_frame_size))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn parse_text(line: &[u8]) -> Result<String> {
    String::from_utf8(line.to_vec())
        .map_err(|_| ClientError::Protocol("Line is not valid UTF-8".to_string()))
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ClientError::Protocol(format!(
                "Invalid integer: {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}
