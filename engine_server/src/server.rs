//! Authoritative server session.
//!
//! Owns exactly `cfg.max_clients` connection slots (Free → Challenging →
//! Connected → Spawned), the global entity store, and one [`Channel`] per
//! non-free slot. A frame is `recv_all(); run_commands(); send_snapshots()`
//! followed by retransmission and timeout enforcement.

use std::rc::Rc;

use engine_shared::{
    config::EngineConfig,
    console::{Console, CvarFlags, CvarValue},
    ecs::{Entity, EntityId, EntityStore},
    math::{Quat, Vec3},
    net::{Channel, MsgType, NetAddr, NetSrc, PacketBuffer, Ticker, Transport},
    protocol::{CreateEntity, DestroyEntity, EntitySynchronize, OobMessage, PlayerCommand, Synchronize},
};
use tracing::{debug, info, warn};

/// Per-slot connection state. `Spawned` is reachable (see
/// [`GameServer::mark_spawned`]) but nothing in this module drives a
/// transition into it — promotion is application-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Challenging,
    Connected,
    Spawned,
}

struct Slot {
    state: SlotState,
    channel: Channel,
    last_recv_tick: u64,
    client_salt: u32,
    server_salt: u32,
    combined_salt: u32,
    last_command: Option<PlayerCommand>,
}

impl Slot {
    fn free() -> Self {
        Self {
            state: SlotState::Free,
            channel: Channel::new(NetSrc::Server),
            last_recv_tick: 0,
            client_salt: 0,
            server_salt: 0,
            combined_salt: 0,
            last_command: None,
        }
    }
}

fn random_nonzero_salt() -> u32 {
    loop {
        let v: u32 = rand::random();
        if v != 0 {
            return v;
        }
    }
}

/// The authoritative game server: slot table, global entity store, console.
pub struct GameServer {
    transport: Rc<dyn Transport>,
    slots: Vec<Slot>,
    store: EntityStore,
    ticker: Ticker,
    console: Console,
    tick: u64,
    cfg: EngineConfig,
}

impl GameServer {
    pub fn new(cfg: EngineConfig, transport: Rc<dyn Transport>) -> Self {
        let mut slots = Vec::with_capacity(cfg.max_clients);
        slots.resize_with(cfg.max_clients, Slot::free);

        let mut console = Console::new();
        Self::register_cvars(&mut console);

        let mut ticker = Ticker::new();
        ticker.start();

        Self {
            transport,
            slots,
            store: EntityStore::new(),
            ticker,
            console,
            tick: 0,
            cfg,
        }
    }

    fn register_cvars(console: &mut Console) {
        console.register_cvar("sv_tickrate", CvarValue::Int(64), "Server tick rate", CvarFlags::NONE);
        console.register_cvar(
            "sv_maxclients",
            CvarValue::Int(4),
            "Max connection slots",
            CvarFlags::NONE,
        );
        console.register_cvar(
            "sv_cheats",
            CvarValue::Bool(false),
            "Allow cheat commands",
            CvarFlags::REPLICATED,
        );
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn slot_state(&self, idx: usize) -> Option<SlotState> {
        self.slots.get(idx).map(|s| s.state)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn connected_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state != SlotState::Free).count()
    }

    /// Runs one server frame: drain inbound traffic, dispatch commands,
    /// broadcast snapshots, retransmit, enforce timeouts.
    pub fn frame(&mut self) {
        self.recv_all();
        self.run_commands();
        self.send_snapshots();
        for slot in self.slots.iter_mut().filter(|s| s.state != SlotState::Free) {
            slot.channel.try_send_reliable(self.transport.as_ref(), slot.combined_salt);
        }
        self.enforce_timeouts();
        self.tick += 1;
    }

    fn recv_all(&mut self) {
        while let Some((mut buf, from)) = self.transport.recv(NetSrc::Server) {
            let mut magic = 0u16;
            if !buf.read_u16(&mut magic) {
                continue;
            }
            match magic {
                engine_shared::net::OOB_MAGIC => self.handle_oob(&mut buf, from),
                engine_shared::net::RELIABLE_MAGIC => self.handle_framed(&mut buf, from),
                _ => debug!(magic, "server: unknown datagram magic, dropping"),
            }
        }
    }

    fn handle_oob(&mut self, buf: &mut PacketBuffer, from: NetAddr) {
        let Some(msg) = OobMessage::parse(buf) else {
            debug!("server: malformed out-of-band packet, dropping");
            return;
        };
        match msg {
            OobMessage::ClientConnect { client_salt } => self.handle_client_connect(client_salt, from),
            OobMessage::ClientChallenge { combined_salt } => self.handle_client_challenge(combined_salt, from),
            OobMessage::ClientDisconnect { combined_salt } => self.handle_client_disconnect(combined_salt),
            _ => debug!("server: ignoring client-bound out-of-band command"),
        }
    }

    fn handle_client_connect(&mut self, client_salt: u32, from: NetAddr) {
        if self
            .slots
            .iter()
            .any(|s| s.state != SlotState::Free && s.client_salt == client_salt)
        {
            debug!(client_salt, "server: duplicate client_connect, dropping");
            return;
        }

        let Some(slot) = self.slots.iter_mut().find(|s| s.state == SlotState::Free) else {
            let mut out = PacketBuffer::new();
            OobMessage::ServerNoRoom.serialize(&mut out);
            Channel::send_out_of_band(self.transport.as_ref(), NetSrc::Server, from, out.data());
            return;
        };

        let server_salt = random_nonzero_salt();
        slot.client_salt = client_salt;
        slot.server_salt = server_salt;
        slot.combined_salt = client_salt ^ server_salt;
        slot.channel = Channel::with_peer(NetSrc::Server, from);
        slot.last_recv_tick = self.tick;
        slot.state = SlotState::Challenging;

        let mut out = PacketBuffer::new();
        OobMessage::ServerChallenge {
            client_salt,
            server_salt,
        }
        .serialize(&mut out);
        Channel::send_out_of_band(self.transport.as_ref(), NetSrc::Server, from, out.data());
    }

    fn handle_client_challenge(&mut self, combined_salt: u32, from: NetAddr) {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.state == SlotState::Challenging && s.combined_salt == combined_salt)
        else {
            return;
        };
        slot.state = SlotState::Connected;
        slot.last_recv_tick = self.tick;

        let mut out = PacketBuffer::new();
        OobMessage::ServerConnect { combined_salt }.serialize(&mut out);
        Channel::send_out_of_band(self.transport.as_ref(), NetSrc::Server, from, out.data());
    }

    fn handle_client_disconnect(&mut self, combined_salt: u32) {
        if let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.state != SlotState::Free && s.combined_salt == combined_salt)
        {
            info!(slot = idx, "server: client disconnected");
            self.slots[idx] = Slot::free();
        }
    }

    fn handle_framed(&mut self, buf: &mut PacketBuffer, from: NetAddr) {
        let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.state != SlotState::Free && s.channel.peer() == from)
        else {
            debug!("server: framed packet from unknown peer, dropping");
            return;
        };

        let combined_salt = self.slots[idx].combined_salt;
        let Some(received) = self.slots[idx].channel.process_header(buf, combined_salt) else {
            return;
        };
        self.slots[idx].last_recv_tick = self.tick;

        for rel in received.reliables {
            self.handle_reliable(idx, rel.msg_type, &rel.payload);
        }

        match received.msg_type {
            MsgType::PlayerCommand => {
                if let Some(cmd) = PlayerCommand::deserialize(buf) {
                    self.slots[idx].last_command = Some(cmd);
                } else {
                    debug!("server: malformed PlayerCommand, dropping");
                }
            }
            MsgType::SendReliables | MsgType::Unknown => {}
            other => debug!(?other, "server: unexpected top-level message type"),
        }
    }

    fn handle_reliable(&mut self, idx: usize, msg_type: MsgType, payload: &[u8]) {
        if msg_type != MsgType::Synchronize {
            debug!(?msg_type, "server: unexpected reliable message type, dropping");
            return;
        }
        let Some(mut inner) = PacketBuffer::from_bytes(payload) else {
            return;
        };
        let Some(sync) = Synchronize::deserialize(&mut inner) else {
            debug!("server: malformed Synchronize payload, dropping");
            return;
        };

        let entities: Vec<(EntityId, Entity)> = self
            .store
            .global_ids()
            .map(|id| (id, self.store.get_global(id).cloned().unwrap_or_default()))
            .collect();

        let reply = Synchronize {
            client_tick: sync.client_tick,
            server_tick: self.tick,
            entities,
        };
        let mut out = PacketBuffer::new();
        if reply.serialize(&mut out) {
            self.slots[idx].channel.add_reliable(MsgType::Synchronize, out.data());
        }
    }

    /// Application-level hook point: nothing to simulate in the networking
    /// core, but `PlayerCommand`s have already been captured in
    /// `Slot::last_command` by `recv_all`.
    fn run_commands(&mut self) {}

    /// Reads back the most recently received command for a slot, if any.
    /// Intended for an application layer sitting above this session.
    pub fn take_last_command(&mut self, idx: usize) -> Option<PlayerCommand> {
        self.slots.get_mut(idx).and_then(|s| s.last_command.take())
    }

    fn send_snapshots(&mut self) {
        let entities: Vec<(EntityId, Entity)> = self
            .store
            .global_ids()
            .map(|id| (id, self.store.get_global(id).cloned().unwrap_or_default()))
            .collect();
        let snap = EntitySynchronize { entities };

        let mut payload = PacketBuffer::new();
        if !snap.serialize(&mut payload) {
            warn!("server: entity snapshot too large to fit one datagram, dropping");
            return;
        }

        for slot in self.slots.iter_mut().filter(|s| s.state != SlotState::Free) {
            let salt = slot.combined_salt;
            slot.channel
                .send_unreliable(self.transport.as_ref(), MsgType::EntitySynchronize, payload.data(), salt);
        }
    }

    fn enforce_timeouts(&mut self) {
        let timeout = self.cfg.client_timeout_ticks;
        let tick = self.tick;
        for idx in 0..self.slots.len() {
            let slot = &self.slots[idx];
            if slot.state == SlotState::Free {
                continue;
            }
            if tick.saturating_sub(slot.last_recv_tick) <= timeout {
                continue;
            }
            info!(slot = idx, "server: client timed out");
            if matches!(slot.state, SlotState::Connected | SlotState::Spawned) {
                let mut out = PacketBuffer::new();
                OobMessage::ServerDisconnect {
                    combined_salt: slot.combined_salt,
                }
                .serialize(&mut out);
                Channel::send_out_of_band(self.transport.as_ref(), NetSrc::Server, slot.channel.peer(), out.data());
            }
            self.slots[idx] = Slot::free();
        }
    }

    /// Reserved: the `Spawned` state is reachable but nothing in this
    /// session drives the transition — that's an application-level
    /// decision (e.g. "player entered the world").
    pub fn mark_spawned(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            if slot.state == SlotState::Connected {
                slot.state = SlotState::Spawned;
            }
        }
    }

    /// Allocates a new global entity and reliably broadcasts
    /// `CreateEntity` to every non-free slot.
    pub fn alloc_global(&mut self, position: Vec3, rotation: Quat, model_name: impl Into<String>) -> Option<EntityId> {
        let id = self.store.next_global()?;
        self.store.alloc_global(id);
        let entity = Entity {
            position,
            rotation,
            model_name: model_name.into(),
        };
        *self.store.get_mut(id).expect("just allocated") = entity.clone();

        let mut payload = PacketBuffer::new();
        CreateEntity { id, entity }.serialize(&mut payload);
        for slot in self.slots.iter_mut().filter(|s| s.state != SlotState::Free) {
            slot.channel.add_reliable(MsgType::CreateEntity, payload.data());
        }
        Some(id)
    }

    /// Frees a global entity and reliably broadcasts `DestroyEntity`.
    pub fn free_global(&mut self, id: EntityId) {
        self.store.free_global(id);
        let mut payload = PacketBuffer::new();
        DestroyEntity { id }.serialize(&mut payload);
        for slot in self.slots.iter_mut().filter(|s| s.state != SlotState::Free) {
            slot.channel.add_reliable(MsgType::DestroyEntity, payload.data());
        }
    }

    /// Executes a console command. `status`/`kick`/`quit` are handled here;
    /// everything else delegates to the generic [`Console`].
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        match tokens[0] {
            "status" => Ok(self.status_lines()),
            "kick" => {
                if tokens.len() < 2 {
                    return Ok(vec!["usage: kick <slot>".to_string()]);
                }
                let idx: usize = tokens[1]
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid slot index: {}", tokens[1]))?;
                Ok(vec![self.kick(idx)])
            }
            "quit" => {
                info!("server: shutting down");
                std::process::exit(0);
            }
            _ => self.console.exec(line),
        }
    }

    fn kick(&mut self, idx: usize) -> String {
        let Some(slot) = self.slots.get_mut(idx) else {
            return format!("no such slot: {}", idx);
        };
        if slot.state == SlotState::Free {
            return format!("slot {} is not connected", idx);
        }
        let mut out = PacketBuffer::new();
        OobMessage::ServerDisconnect {
            combined_salt: slot.combined_salt,
        }
        .serialize(&mut out);
        Channel::send_out_of_band(self.transport.as_ref(), NetSrc::Server, slot.channel.peer(), out.data());
        *slot = Slot::free();
        format!("kicked slot {}", idx)
    }

    fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("tick: {} (ticker: {})", self.tick, self.ticker.get_total_ticks())];
        for (idx, slot) in self.slots.iter().enumerate() {
            lines.push(format!(
                "  slot {}: {:?} combined_salt={:#010x}",
                idx, slot.state, slot.combined_salt
            ));
        }
        lines.push(format!("global entities: {}", self.store.global_ids().count()));
        lines
    }
}
