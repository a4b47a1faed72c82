//! Protocol Module
//!
//! Commands, replies and the RESP2 codec spoken with a Redis-like server.
//!
//! ## Commands
//! - GET  key
//! - SET  key value
//! - DEL  key
//! - PING
//!
//! Replies carry no request identifier. The server answers strictly in the
//! order commands were written, and that order is the only correlation
//! information the client has.

mod command;
mod response;
mod codec;

pub use command::{Command, CommandKind};
pub use response::Response;
pub use codec::{
    decode_command, decode_response, encode_command, encode_response, ResponseDecoder,
    MAX_FRAME_SIZE,
};
