//! Wire protocol, channel multiplexing, transport, and tick timing.
//!
//! Layering: `buf` (byte encoding) underlies `channel` (framing + acks),
//! which is driven over a `transport` (in-process or cross-process) and
//! paced by a `ticker`. Session code (in `engine_server`/`engine_client`)
//! owns one `Channel` per peer and calls into this module only.

mod addr;
mod buf;
mod channel;
mod ticker;
mod transport;

pub use addr::{NetAddr, NetSrc};
pub use buf::{PacketBuffer, MAX_BYTES};
pub use channel::{Channel, MsgType, ReliableDelivery, Received, OOB_MAGIC, RELIABLE_MAGIC};
pub use ticker::{Ticker, TICK_RATE};
pub use transport::{DatagramTransport, LoopbackTransport, PortAllocator, Transport};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::test_support;

/// Out-of-band command grammar: a NUL-terminated ASCII verb followed by raw
/// binary args, shared verbatim between client and server.
pub mod oob {
    pub const CLIENT_CONNECT: &str = "client_connect";
    pub const CLIENT_CHALLENGE: &str = "client_challenge";
    pub const CLIENT_DISCONNECT: &str = "client_disconnect";
    pub const SERVER_CHALLENGE: &str = "server_challenge";
    pub const SERVER_CONNECT: &str = "server_connect";
    pub const SERVER_DISCONNECT: &str = "server_disconnect";
    pub const SERVER_NOROOM: &str = "server_noroom";
}
