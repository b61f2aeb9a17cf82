//! Network addressing.
//!
//! Both transport backends share one addressing model so Channel and
//! Session code never need to know which backend they're running on.

/// Which role a transport endpoint acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetSrc {
    Client,
    Server,
}

/// A tagged peer address. Port 0 denotes the server's well-known address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetAddr {
    #[default]
    Unknown,
    Loopback {
        port: u16,
    },
}

impl NetAddr {
    pub const SERVER: NetAddr = NetAddr::Loopback { port: 0 };

    pub fn port(&self) -> Option<u16> {
        match self {
            NetAddr::Unknown => None,
            NetAddr::Loopback { port } => Some(*port),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, NetAddr::Unknown)
    }
}
