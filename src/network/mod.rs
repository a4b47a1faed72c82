//! Network Module
//!
//! TCP plumbing for a client connection.
//!
//! ## Architecture
//! - One stream per connection, split in two
//! - Write half behind the client's writer lock ([`TcpTransport`])
//! - Read half owned by a dedicated reader thread ([`ResponseReader`])

mod transport;
mod reader;

pub use transport::{TcpTransport, Transport};
pub use reader::ResponseReader;
