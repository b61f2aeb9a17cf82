//! Reliable/unreliable multiplexed channel.
//!
//! One `Channel` is owned by exactly one session slot and talks to exactly
//! one peer address. It frames outgoing datagrams, tracks acks over a
//! 128-slot ring per direction, and piggybacks retransmissions onto whatever
//! goes out next.

use tracing::debug;

use super::addr::{NetAddr, NetSrc};
use super::buf::PacketBuffer;
use super::transport::Transport;

pub const OOB_MAGIC: u16 = 15625;
pub const RELIABLE_MAGIC: u16 = 3125;

const RING_SIZE: usize = 128;
const ACK_SCAN: u32 = 64;

/// Channel message type. Bit 7 set => reliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Unknown,
    EntitySynchronize,
    PlayerCommand,
    Synchronize,
    CreateEntity,
    DestroyEntity,
    SendReliables,
}

impl MsgType {
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            MsgType::Synchronize | MsgType::CreateEntity | MsgType::DestroyEntity
        )
    }

    fn to_byte(self) -> u8 {
        match self {
            MsgType::Unknown => 0,
            MsgType::EntitySynchronize => 1,
            MsgType::PlayerCommand => 2,
            MsgType::Synchronize => 0x81,
            MsgType::CreateEntity => 0x82,
            MsgType::DestroyEntity => 0x83,
            MsgType::SendReliables => 0xFF,
        }
    }

    fn from_byte(b: u8) -> MsgType {
        match b {
            1 => MsgType::EntitySynchronize,
            2 => MsgType::PlayerCommand,
            0x81 => MsgType::Synchronize,
            0x82 => MsgType::CreateEntity,
            0x83 => MsgType::DestroyEntity,
            0xFF => MsgType::SendReliables,
            _ => MsgType::Unknown,
        }
    }
}

struct OutEntry {
    key: u32,
    acked: bool,
    data: Vec<u8>,
}

impl Default for OutEntry {
    fn default() -> Self {
        Self {
            key: 0,
            acked: true,
            data: Vec::new(),
        }
    }
}

struct InEntry {
    key: u32,
    acked: bool,
}

impl Default for InEntry {
    fn default() -> Self {
        Self {
            key: 0,
            acked: false,
        }
    }
}

/// A delivered reliable payload: the type byte plus its raw bytes.
pub struct ReliableDelivery {
    pub msg_type: MsgType,
    pub payload: Vec<u8>,
}

/// Result of processing one framed, authenticated datagram.
pub struct Received {
    pub msg_type: MsgType,
    pub reliables: Vec<ReliableDelivery>,
}

/// A per-peer reliable/unreliable multiplexed channel.
pub struct Channel {
    net_src: NetSrc,
    peer: NetAddr,

    out_ring: Vec<OutEntry>,
    in_ring: Vec<InEntry>,

    outgoing_sequence: u32,
    incoming_sequence: u32,
    outgoing_reliable_sequence: u32,
    incoming_reliable_sequence: u32,

    should_try_reliable: bool,
}

impl Channel {
    pub fn new(net_src: NetSrc) -> Self {
        Self::with_peer(net_src, NetAddr::Unknown)
    }

    pub fn with_peer(net_src: NetSrc, peer: NetAddr) -> Self {
        let mut out_ring = Vec::with_capacity(RING_SIZE);
        out_ring.resize_with(RING_SIZE, OutEntry::default);
        let mut in_ring = Vec::with_capacity(RING_SIZE);
        in_ring.resize_with(RING_SIZE, InEntry::default);

        Self {
            net_src,
            peer,
            out_ring,
            in_ring,
            outgoing_sequence: 0,
            incoming_sequence: 0,
            outgoing_reliable_sequence: 0,
            incoming_reliable_sequence: 0,
            should_try_reliable: true,
        }
    }

    pub fn peer(&self) -> NetAddr {
        self.peer
    }

    pub fn set_peer(&mut self, peer: NetAddr) {
        self.peer = peer;
    }

    /// Sends a short ASCII command (plus raw args already appended) outside
    /// any session/handshake state.
    pub fn send_out_of_band(transport: &dyn Transport, src: NetSrc, dst: NetAddr, payload: &[u8]) {
        let mut buf = PacketBuffer::new();
        buf.write_u16(OOB_MAGIC);
        buf.write_bytes(payload);
        transport.send(src, buf.data(), dst);
    }

    pub fn send_out_of_band_str(transport: &dyn Transport, src: NetSrc, dst: NetAddr, cmd: &str) {
        let mut buf = PacketBuffer::new();
        buf.write_string(cmd);
        Self::send_out_of_band(transport, src, dst, buf.data());
    }

    fn out_index(seq: u32) -> usize {
        (seq as usize) % RING_SIZE
    }

    fn get_out(&self, seq: u32) -> Option<&OutEntry> {
        let e = &self.out_ring[Self::out_index(seq)];
        (e.key == seq).then_some(e)
    }

    fn get_out_mut(&mut self, seq: u32) -> Option<&mut OutEntry> {
        let idx = Self::out_index(seq);
        let e = &mut self.out_ring[idx];
        (e.key == seq).then_some(e)
    }

    fn get_in(&self, seq: u32) -> Option<&InEntry> {
        let e = &self.in_ring[Self::out_index(seq)];
        (e.key == seq).then_some(e)
    }

    fn insert_in(&mut self, seq: u32) -> &mut InEntry {
        let idx = Self::out_index(seq);
        let e = &mut self.in_ring[idx];
        e.key = seq;
        e.acked = false;
        e
    }

    /// Queues a reliable payload for (re)transmission. Does not send
    /// immediately; `trySendReliable`/the next framed send piggybacks it.
    ///
    /// Panics if `msg_type` is not a reliable type — that is a programming
    /// contract violation, not a recoverable wire error.
    pub fn add_reliable(&mut self, msg_type: MsgType, payload: &[u8]) {
        if self.peer.is_unknown() {
            return;
        }
        assert!(
            msg_type.is_reliable(),
            "tried to send unreliable message type through reliable path"
        );

        self.outgoing_reliable_sequence = self.outgoing_reliable_sequence.wrapping_add(1);
        let seq = self.outgoing_reliable_sequence;

        let mut data = Vec::with_capacity(payload.len() + 1);
        data.push(msg_type.to_byte());
        data.extend_from_slice(payload);

        let idx = Self::out_index(seq);
        self.out_ring[idx] = OutEntry {
            key: seq,
            acked: false,
            data,
        };
    }

    /// Sends an unreliable datagram right now, piggybacking any unacked
    /// reliables.
    ///
    /// Panics if `msg_type` is reliable (except the `SendReliables` carrier)
    /// — a programming contract violation.
    pub fn send_unreliable(
        &mut self,
        transport: &dyn Transport,
        msg_type: MsgType,
        payload: &[u8],
        salt: u32,
    ) -> bool {
        if self.peer.is_unknown() {
            return false;
        }
        assert!(
            !msg_type.is_reliable() || msg_type == MsgType::SendReliables,
            "tried to send reliable message type through unreliable path"
        );

        let mut buf = PacketBuffer::new();
        self.write_header(&mut buf, msg_type, salt);
        buf.write_bytes(payload);

        let sent = transport.send(self.net_src, buf.data(), self.peer);
        self.should_try_reliable = false;
        sent
    }

    /// Call once per tick after dispatch. Emits a `SendReliables` carrier if
    /// there is an unacked reliable and nothing else went out this tick.
    pub fn try_send_reliable(&mut self, transport: &dyn Transport, salt: u32) {
        let reliable = self.should_try_reliable;
        self.should_try_reliable = true;
        if !reliable {
            return;
        }

        let mut unacked = false;
        let mut seq = self.outgoing_reliable_sequence;
        for _ in 0..=ACK_SCAN {
            if let Some(e) = self.get_out(seq) {
                if !e.acked {
                    unacked = true;
                    break;
                }
            }
            seq = seq.wrapping_sub(1);
        }

        if unacked {
            self.send_unreliable(transport, MsgType::SendReliables, &[], salt);
        }
    }

    fn write_header(&mut self, out: &mut PacketBuffer, msg_type: MsgType, salt: u32) {
        out.write_u16(RELIABLE_MAGIC);
        out.write_u8(msg_type.to_byte());
        out.write_u32(salt);

        self.outgoing_sequence = self.outgoing_sequence.wrapping_add(1);
        out.write_u32(self.outgoing_sequence);

        out.write_u32(self.incoming_reliable_sequence);

        let mut ack_bits: u64 = 0;
        let mut seq = self.incoming_reliable_sequence.wrapping_sub(1);
        for k in 0..ACK_SCAN {
            if let Some(e) = self.get_in(seq) {
                if e.acked {
                    ack_bits |= 1u64 << k;
                }
            }
            seq = seq.wrapping_sub(1);
        }
        out.write_u64(ack_bits);

        // Collect unacked outgoing reliables, newest-first, then reverse so
        // the peer executes them oldest-first.
        let mut pending: Vec<u32> = Vec::new();
        let mut seq = self.outgoing_reliable_sequence;
        for _ in 0..=ACK_SCAN {
            if let Some(e) = self.get_out(seq) {
                if !e.acked {
                    pending.push(seq);
                }
            }
            seq = seq.wrapping_sub(1);
        }
        pending.reverse();

        out.write_u8(pending.len() as u8);
        for seq in pending {
            let entry = self.get_out(seq).expect("scanned sequence must be present");
            out.write_u32(seq);
            out.write_u32(entry.data.len() as u32);
            out.write_bytes(&entry.data);
        }
    }

    /// Parses a framed datagram (magic already consumed by the caller's
    /// dispatch) and applies ack bookkeeping. `expected_salt` is the
    /// session's agreed `combined_salt`.
    ///
    /// Returns `None` on any malformed input, salt mismatch, or a sequence
    /// that is not newer than what we've already accepted.
    pub fn process_header(&mut self, buf: &mut PacketBuffer, expected_salt: u32) -> Option<Received> {
        let mut msg_byte = 0u8;
        if !buf.read_u8(&mut msg_byte) {
            return None;
        }
        let msg_type = MsgType::from_byte(msg_byte);

        let mut salt = 0u32;
        if !buf.read_u32(&mut salt) {
            return None;
        }
        if salt != expected_salt {
            debug!(salt, expected_salt, "channel: salt mismatch, dropping");
            return None;
        }

        let mut sequence = 0u32;
        if !buf.read_u32(&mut sequence) {
            return None;
        }
        let mut ack = 0u32;
        if !buf.read_u32(&mut ack) {
            return None;
        }
        let mut ack_bits = 0u64;
        if !buf.read_u64(&mut ack_bits) {
            return None;
        }
        let mut n_reliable = 0u8;
        if !buf.read_u8(&mut n_reliable) {
            return None;
        }

        struct Incoming {
            sequence: u32,
            data: Vec<u8>,
        }
        let mut incoming = Vec::with_capacity(n_reliable as usize);
        for _ in 0..n_reliable {
            let mut seq = 0u32;
            if !buf.read_u32(&mut seq) {
                return None;
            }
            let mut len = 0u32;
            if !buf.read_u32(&mut len) {
                return None;
            }
            let mut data = vec![0u8; len as usize];
            if !buf.read_bytes(&mut data) {
                return None;
            }
            incoming.push(Incoming { sequence: seq, data });
        }

        if sequence < self.incoming_sequence {
            return None;
        }
        self.incoming_sequence = sequence;

        if let Some(e) = self.get_out_mut(ack) {
            e.acked = true;
        }
        let mut seq = ack.wrapping_sub(1);
        for k in 0..ACK_SCAN {
            if ack_bits & (1u64 << k) != 0 {
                if let Some(e) = self.get_out_mut(seq) {
                    e.acked = true;
                }
            }
            seq = seq.wrapping_sub(1);
        }

        let mut reliables = Vec::with_capacity(incoming.len());
        for msg in incoming {
            if self.get_in(msg.sequence).is_some() {
                continue; // duplicate, already delivered
            }
            let entry = self.insert_in(msg.sequence);
            entry.acked = true;
            self.incoming_reliable_sequence =
                self.incoming_reliable_sequence.max(msg.sequence);

            if msg.data.is_empty() {
                continue;
            }
            let inner_type = MsgType::from_byte(msg.data[0]);
            reliables.push(ReliableDelivery {
                msg_type: inner_type,
                payload: msg.data[1..].to_vec(),
            });
        }

        Some(Received {
            msg_type,
            reliables,
        })
    }

    /// Test-only: whether the outgoing reliable at `seq` has been acked.
    /// Returns `true` if no entry with that sequence currently occupies the
    /// ring (nothing left to wait for).
    #[cfg(any(test, feature = "test-utils"))]
    pub fn out_acked(&self, seq: u32) -> bool {
        self.get_out(seq).map(|e| e.acked).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::LoopbackTransport;

    #[test]
    fn unreliable_roundtrip() {
        let transport = LoopbackTransport::new();
        let mut a = Channel::with_peer(NetSrc::Client, NetAddr::Loopback { port: 0 });
        let mut b = Channel::with_peer(NetSrc::Server, NetAddr::Loopback { port: 7 });

        assert!(a.send_unreliable(&transport, MsgType::PlayerCommand, &[1, 2, 3], 42));

        let (mut buf, _from) = transport.recv(NetSrc::Server).expect("datagram");
        let mut magic = 0u16;
        assert!(buf.read_u16(&mut magic));
        assert_eq!(magic, RELIABLE_MAGIC);

        let received = b.process_header(&mut buf, 42).expect("valid frame");
        assert_eq!(received.msg_type, MsgType::PlayerCommand);
    }

    #[test]
    fn reliable_delivered_in_order() {
        let transport = LoopbackTransport::new();
        let mut a = Channel::with_peer(NetSrc::Client, NetAddr::Loopback { port: 0 });
        let mut b = Channel::with_peer(NetSrc::Server, NetAddr::Loopback { port: 7 });

        a.add_reliable(MsgType::CreateEntity, &[1]);
        a.add_reliable(MsgType::CreateEntity, &[2]);
        a.try_send_reliable(&transport, 1);

        let (mut buf, _from) = transport.recv(NetSrc::Server).expect("datagram");
        let mut magic = 0u16;
        buf.read_u16(&mut magic);
        let received = b.process_header(&mut buf, 1).expect("valid frame");
        assert_eq!(received.reliables.len(), 2);
        assert_eq!(received.reliables[0].payload, vec![1]);
        assert_eq!(received.reliables[1].payload, vec![2]);
    }

    #[test]
    fn salt_mismatch_rejected() {
        let transport = LoopbackTransport::new();
        let mut a = Channel::with_peer(NetSrc::Client, NetAddr::Loopback { port: 0 });
        let mut b = Channel::with_peer(NetSrc::Server, NetAddr::Loopback { port: 7 });

        a.send_unreliable(&transport, MsgType::PlayerCommand, &[], 0xF4D4B45C);
        let (mut buf, _from) = transport.recv(NetSrc::Server).expect("datagram");
        let mut magic = 0u16;
        buf.read_u16(&mut magic);
        assert!(b.process_header(&mut buf, 0).is_none());
    }

    #[test]
    #[should_panic]
    fn sending_reliable_type_unreliably_panics() {
        let transport = LoopbackTransport::new();
        let mut a = Channel::with_peer(NetSrc::Client, NetAddr::Loopback { port: 0 });
        a.send_unreliable(&transport, MsgType::CreateEntity, &[], 0);
    }
}
