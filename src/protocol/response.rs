//! Response definitions
//!
//! Represents replies from the server. Replies carry no identifier; they are
//! matched to commands purely by arrival order.

use bytes::Bytes;

use crate::error::{ClientError, Result};

/// A decoded server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `+OK`
    Simple(String),

    /// `-ERR ...` (a correlated reply, not a connection fault)
    Error(String),

    /// `:42`
    Integer(i64),

    /// `$5\r\nhello`
    Bulk(Bytes),

    /// `$-1` / `*-1`
    Nil,

    /// `*N ...`
    Array(Vec<Response>),
}

impl Response {
    /// Create an `+OK` reply
    pub fn ok() -> Self {
        Response::Simple("OK".to_string())
    }

    /// Create a bulk reply from a string
    pub fn bulk(value: impl AsRef<[u8]>) -> Self {
        Response::Bulk(Bytes::copy_from_slice(value.as_ref()))
    }

    /// Create an error reply
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Response::Nil)
    }

    /// Borrow the reply as UTF-8 text, if it is simple or bulk
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Response::Simple(s) => Some(s.as_str()),
            Response::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Convert a server error reply into `ClientError::Server`
    pub fn into_result(self) -> Result<Response> {
        match self {
            Response::Error(message) => Err(ClientError::Server(message)),
            other => Ok(other),
        }
    }
}
