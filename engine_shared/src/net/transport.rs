//! Datagram transport.
//!
//! Two interchangeable backends share one addressing model
//! (`NetAddr::Loopback{port}`) so `Channel` and session code never need to
//! know which one is in play.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::path::PathBuf;

use tracing::{debug, warn};

use super::addr::{NetAddr, NetSrc};
use super::buf::PacketBuffer;

/// Non-blocking datagram send/receive addressed by `(role, NetAddr)`.
///
/// `send` is best-effort: a missing peer is a non-fatal failure, reported
/// and dropped. `recv` never blocks; it returns `None` when nothing is
/// pending.
pub trait Transport {
    fn send(&self, src: NetSrc, data: &[u8], dst: NetAddr) -> bool;
    fn recv(&self, src: NetSrc) -> Option<(PacketBuffer, NetAddr)>;
}

const LOOPBACK_QUEUE_LEN: usize = 4;

/// In-process loopback: a ring buffer of 4 messages per role. Overflow
/// drops the oldest unread message. Mirrors the testing surface.
pub struct LoopbackTransport {
    client_addr: NetAddr,
    server_addr: NetAddr,
    to_server: RefCell<VecDeque<(Vec<u8>, NetAddr)>>,
    to_client: RefCell<VecDeque<(Vec<u8>, NetAddr)>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::with_client_port(1)
    }

    pub fn with_client_port(client_port: u16) -> Self {
        Self {
            client_addr: NetAddr::Loopback { port: client_port },
            server_addr: NetAddr::SERVER,
            to_server: RefCell::new(VecDeque::with_capacity(LOOPBACK_QUEUE_LEN)),
            to_client: RefCell::new(VecDeque::with_capacity(LOOPBACK_QUEUE_LEN)),
        }
    }

    pub fn client_addr(&self) -> NetAddr {
        self.client_addr
    }

    pub fn server_addr(&self) -> NetAddr {
        self.server_addr
    }

    fn push(queue: &RefCell<VecDeque<(Vec<u8>, NetAddr)>>, entry: (Vec<u8>, NetAddr)) {
        let mut q = queue.borrow_mut();
        if q.len() >= LOOPBACK_QUEUE_LEN {
            q.pop_front();
        }
        q.push_back(entry);
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, src: NetSrc, data: &[u8], _dst: NetAddr) -> bool {
        let from = match src {
            NetSrc::Client => self.client_addr,
            NetSrc::Server => self.server_addr,
        };
        match src {
            NetSrc::Client => Self::push(&self.to_server, (data.to_vec(), from)),
            NetSrc::Server => Self::push(&self.to_client, (data.to_vec(), from)),
        }
        true
    }

    fn recv(&self, src: NetSrc) -> Option<(PacketBuffer, NetAddr)> {
        let queue = match src {
            NetSrc::Client => &self.to_client,
            NetSrc::Server => &self.to_server,
        };
        let (bytes, from) = queue.borrow_mut().pop_front()?;
        PacketBuffer::from_bytes(&bytes).map(|b| (b, from))
    }
}

/// Allocates client ports out of a shared, file-backed table of 64 slots.
///
/// Each slot is claimed by atomically creating `slot_NN` in the table
/// directory (`create_new`, which is exclusive at the filesystem level —
/// the cross-process equivalent of a whole-segment advisory lock, without
/// holding a lock file descriptor open for the process lifetime). Port 0 is
/// reserved for the server and never handed out.
pub struct PortAllocator {
    dir: PathBuf,
}

const PORT_TABLE_SLOTS: u16 = 64;
const PORT_BASE: u16 = 1;

impl PortAllocator {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn default_dir() -> PathBuf {
        std::env::temp_dir().join("engine_net_ports")
    }

    pub fn shared() -> std::io::Result<Self> {
        Self::new(Self::default_dir())
    }

    fn slot_path(&self, slot: u16) -> PathBuf {
        self.dir.join(format!("slot_{slot:02}"))
    }

    /// Claims the first free slot and returns its port number (`PORT_BASE
    /// ..`). Returns `None` if the table is full.
    pub fn alloc(&self) -> Option<u16> {
        for slot in 0..PORT_TABLE_SLOTS {
            let path = self.slot_path(slot);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    let _ = write!(f, "{}", std::process::id());
                    return Some(PORT_BASE + slot);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    warn!(error = %e, "port allocator: failed to claim slot");
                    continue;
                }
            }
        }
        None
    }

    pub fn free(&self, port: u16) {
        if port < PORT_BASE {
            return;
        }
        let slot = port - PORT_BASE;
        let _ = fs::remove_file(self.slot_path(slot));
    }
}

/// Cross-process loopback over real UDP sockets on `127.0.0.1`. One server
/// endpoint at a well-known base port, one client endpoint per process at a
/// dynamically allocated port.
pub struct DatagramTransport {
    base_port: u16,
    socket: StdUdpSocket,
    local_port: u16,
}

impl DatagramTransport {
    fn addr_for(base_port: u16, net_addr: NetAddr) -> Option<SocketAddr> {
        let port = net_addr.port()?;
        Some(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port + port,
        ))
    }

    pub fn bind_server(base_port: u16) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), base_port);
        let socket = StdUdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            base_port,
            socket,
            local_port: 0,
        })
    }

    pub fn bind_client(base_port: u16, local_port: u16) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), base_port + local_port);
        let socket = StdUdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            base_port,
            socket,
            local_port,
        })
    }

    pub fn local_net_addr(&self) -> NetAddr {
        NetAddr::Loopback {
            port: self.local_port,
        }
    }
}

impl Transport for DatagramTransport {
    fn send(&self, _src: NetSrc, data: &[u8], dst: NetAddr) -> bool {
        let Some(addr) = Self::addr_for(self.base_port, dst) else {
            return false;
        };
        match self.socket.send_to(data, addr) {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!(%addr, "transport: peer absent");
                false
            }
            Err(e) => {
                warn!(error = %e, "transport: send failed");
                false
            }
        }
    }

    fn recv(&self, _src: NetSrc) -> Option<(PacketBuffer, NetAddr)> {
        let mut raw = [0u8; super::buf::MAX_BYTES];
        match self.socket.recv_from(&mut raw) {
            Ok((n, from)) => {
                let port = from.port().checked_sub(self.base_port).unwrap_or(0);
                let buf = PacketBuffer::from_bytes(&raw[..n])?;
                Some((buf, NetAddr::Loopback { port }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "transport: recv failed");
                None
            }
        }
    }
}

/// Test-only support for exercising Channel's reliability logic under loss
/// and reorder, per the testable-property suite.
#[doc(hidden)]
pub mod test_support {
    use super::*;
    use std::cell::RefCell as Cell;

    /// Wraps a `LoopbackTransport` and drops/reorders datagrams
    /// deterministically for property tests. Not used outside `#[cfg(test)]`.
    pub struct LossyTransport {
        inner: LoopbackTransport,
        drop_every_nth: usize,
        counter: Cell<usize>,
    }

    impl LossyTransport {
        pub fn new(drop_every_nth: usize) -> Self {
            Self {
                inner: LoopbackTransport::new(),
                drop_every_nth: drop_every_nth.max(1),
                counter: Cell::new(0),
            }
        }
    }

    impl Transport for LossyTransport {
        fn send(&self, src: NetSrc, data: &[u8], dst: NetAddr) -> bool {
            let n = {
                let mut c = self.counter.borrow_mut();
                *c += 1;
                *c
            };
            if n % self.drop_every_nth == 0 {
                return true; // silently dropped, as a lossy link would
            }
            self.inner.send(src, data, dst)
        }

        fn recv(&self, src: NetSrc) -> Option<(PacketBuffer, NetAddr)> {
            self.inner.recv(src)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip() {
        let t = LoopbackTransport::new();
        assert!(t.send(NetSrc::Client, &[1, 2, 3], t.server_addr()));
        let (buf, from) = t.recv(NetSrc::Server).expect("datagram");
        assert_eq!(buf.data(), &[1, 2, 3]);
        assert_eq!(from, t.client_addr());
    }

    #[test]
    fn loopback_drops_oldest_on_overflow() {
        let t = LoopbackTransport::new();
        for i in 0..6u8 {
            t.send(NetSrc::Client, &[i], t.server_addr());
        }
        let mut seen = Vec::new();
        while let Some((buf, _)) = t.recv(NetSrc::Server) {
            seen.push(buf.data()[0]);
        }
        assert_eq!(seen, vec![2, 3, 4, 5]);
    }

    #[test]
    fn port_allocator_avoids_zero_and_reuses_freed_slots() {
        let dir = std::env::temp_dir().join(format!("engine_net_ports_test_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let alloc = PortAllocator::new(dir.clone()).unwrap();

        let p1 = alloc.alloc().unwrap();
        assert!(p1 >= PORT_BASE);
        alloc.free(p1);
        let p2 = alloc.alloc().unwrap();
        assert_eq!(p1, p2);

        let _ = fs::remove_dir_all(&dir);
    }
}
