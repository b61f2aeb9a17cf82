//! The client session's state stack: `Menu`, `Connecting` (itself a small
//! sub-state machine), and `Connected`. At most one state — the top of the
//! stack — receives events and updates per tick; pushing a new state pauses
//! whatever was on top, popping resumes whatever is left.

use tracing::{debug, info};

use engine_shared::net::{
    Channel, MsgType, NetAddr, NetSrc, PacketBuffer, TICK_RATE, OOB_MAGIC, RELIABLE_MAGIC,
};
use engine_shared::protocol::{CreateEntity, DestroyEntity, EntitySynchronize, OobMessage, PlayerCommand, Synchronize};

use crate::interp::{Snapshot, SnapshotBuffer};

use super::GameClient;

const RESEND_TICKS: u64 = 5 * TICK_RATE;
const GIVE_UP_TICKS: u64 = 30 * TICK_RATE;
const SNAPSHOT_HISTORY: usize = 4;

/// A discrete input event, already debounced from raw key state by
/// [`crate::input::InputState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Up,
    Down,
    Enter,
    Escape,
}

/// What a state's `update`/`consume_event` wants the stack to do next.
pub enum Transition {
    Stay,
    Push(SessionState),
    Pop,
}

/// Tagged union of the three session states. A tagged variant (rather than
/// `Box<dyn SessionState>`) keeps the stack's contents inspectable and
/// avoids heap allocation for what is, at most, three elements deep.
pub enum SessionState {
    Menu(MenuState),
    Connecting(ConnectingState),
    Connected(ConnectedState),
}

impl SessionState {
    pub fn pause(&mut self) {
        match self {
            SessionState::Menu(s) => s.pause(),
            SessionState::Connecting(s) => s.pause(),
            SessionState::Connected(s) => s.pause(),
        }
    }

    pub fn resume(&mut self) {
        match self {
            SessionState::Menu(s) => s.resume(),
            SessionState::Connecting(s) => s.resume(),
            SessionState::Connected(s) => s.resume(),
        }
    }

    pub fn consume_event(&mut self, ev: InputEvent, gc: &mut GameClient) -> Transition {
        match self {
            SessionState::Menu(s) => s.consume_event(ev, gc),
            SessionState::Connecting(s) => s.consume_event(ev, gc),
            SessionState::Connected(s) => s.consume_event(ev, gc),
        }
    }

    pub fn update(&mut self, gc: &mut GameClient) -> Transition {
        match self {
            SessionState::Menu(s) => s.update(gc),
            SessionState::Connecting(s) => s.update(gc),
            SessionState::Connected(s) => s.update(gc),
        }
    }

    pub fn draw(&self, gc: &GameClient) {
        match self {
            SessionState::Menu(s) => s.draw(gc),
            SessionState::Connecting(s) => s.draw(gc),
            SessionState::Connected(s) => s.draw(gc),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Menu(_) => "menu",
            SessionState::Connecting(s) => s.phase_name(),
            SessionState::Connected(_) => "connected",
        }
    }
}

/// The main menu: a couple of labeled choices, `Up`/`Down` to move the
/// selection, `Enter` to act on it.
pub struct MenuState {
    selected: usize,
}

const MENU_ITEMS: &[&str] = &["Start Game", "Quit"];

impl Default for MenuState {
    fn default() -> Self {
        Self::new()
    }
}

impl MenuState {
    pub fn new() -> Self {
        Self { selected: 0 }
    }

    pub fn items(&self) -> &'static [&'static str] {
        MENU_ITEMS
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    fn pause(&mut self) {}
    fn resume(&mut self) {}

    fn consume_event(&mut self, ev: InputEvent, gc: &mut GameClient) -> Transition {
        match ev {
            InputEvent::Up => {
                self.selected = self.selected.saturating_sub(1);
                Transition::Stay
            }
            InputEvent::Down => {
                self.selected = (self.selected + 1).min(MENU_ITEMS.len() - 1);
                Transition::Stay
            }
            InputEvent::Enter => match self.selected {
                0 => Transition::Push(SessionState::Connecting(ConnectingState::new(gc.tick()))),
                _ => {
                    info!("client: quit selected from menu");
                    std::process::exit(0);
                }
            },
            InputEvent::Escape => Transition::Stay,
        }
    }

    fn update(&mut self, _gc: &mut GameClient) -> Transition {
        Transition::Stay
    }

    fn draw(&self, _gc: &GameClient) {}
}

enum Phase {
    Connecting { client_salt: u32 },
    Challenging { client_salt: u32, combined_salt: u32 },
    AlmostConnected { combined_salt: u32 },
    Done,
}

/// Handshake sub-state machine: resends its current handshake packet every
/// [`RESEND_TICKS`] until it hears the expected reply, and gives up after
/// [`GIVE_UP_TICKS`] from when it started regardless of which phase it's in.
pub struct ConnectingState {
    phase: Phase,
    entered_tick: u64,
    last_resend_tick: Option<u64>,
}

fn random_nonzero_salt() -> u32 {
    loop {
        let salt: u32 = rand::random();
        if salt != 0 {
            return salt;
        }
    }
}

impl ConnectingState {
    pub fn new(now_tick: u64) -> Self {
        Self {
            phase: Phase::Connecting {
                client_salt: random_nonzero_salt(),
            },
            entered_tick: now_tick,
            last_resend_tick: None,
        }
    }

    fn phase_name(&self) -> &'static str {
        match self.phase {
            Phase::Connecting { .. } => "connecting",
            Phase::Challenging { .. } => "challenging",
            Phase::AlmostConnected { .. } => "almost_connected",
            Phase::Done => "connecting_done",
        }
    }

    fn pause(&mut self) {}
    fn resume(&mut self) {}

    fn consume_event(&mut self, _ev: InputEvent, _gc: &mut GameClient) -> Transition {
        Transition::Stay
    }

    fn should_resend(&self, now: u64) -> bool {
        self.last_resend_tick.map_or(true, |t| now.saturating_sub(t) >= RESEND_TICKS)
    }

    fn update(&mut self, gc: &mut GameClient) -> Transition {
        let now = gc.tick();

        if matches!(self.phase, Phase::Done) {
            return Transition::Pop;
        }
        if now.saturating_sub(self.entered_tick) >= GIVE_UP_TICKS {
            info!("client: gave up connecting");
            return Transition::Pop;
        }

        match self.phase {
            Phase::Connecting { client_salt } => {
                if self.should_resend(now) {
                    let mut out = PacketBuffer::new();
                    OobMessage::ClientConnect { client_salt }.serialize(&mut out);
                    Channel::send_out_of_band(gc.transport(), NetSrc::Client, NetAddr::SERVER, out.data());
                    self.last_resend_tick = Some(now);
                }

                while let Some((mut buf, _from)) = gc.transport().recv(NetSrc::Client) {
                    let mut magic = 0u16;
                    if !buf.read_u16(&mut magic) || magic != OOB_MAGIC {
                        continue;
                    }
                    match OobMessage::parse(&mut buf) {
                        Some(OobMessage::ServerChallenge { client_salt: echoed, server_salt })
                            if echoed == client_salt =>
                        {
                            self.phase = Phase::Challenging {
                                client_salt,
                                combined_salt: client_salt ^ server_salt,
                            };
                            self.last_resend_tick = None;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Phase::Challenging { combined_salt, .. } => {
                if self.should_resend(now) {
                    let mut out = PacketBuffer::new();
                    OobMessage::ClientChallenge { combined_salt }.serialize(&mut out);
                    Channel::send_out_of_band(gc.transport(), NetSrc::Client, NetAddr::SERVER, out.data());
                    self.last_resend_tick = Some(now);
                }

                while let Some((mut buf, from)) = gc.transport().recv(NetSrc::Client) {
                    let mut magic = 0u16;
                    if !buf.read_u16(&mut magic) || magic != OOB_MAGIC {
                        continue;
                    }
                    if let Some(OobMessage::ServerConnect { combined_salt: echoed }) = OobMessage::parse(&mut buf) {
                        if echoed == combined_salt {
                            gc.on_handshake_complete(from, combined_salt);
                            self.phase = Phase::AlmostConnected { combined_salt };
                            self.last_resend_tick = None;
                            break;
                        }
                    }
                }
            }
            Phase::AlmostConnected { combined_salt } => {
                if self.should_resend(now) {
                    let mut payload = PacketBuffer::new();
                    Synchronize {
                        client_tick: now,
                        server_tick: 0,
                        entities: Vec::new(),
                    }
                    .serialize(&mut payload);
                    gc.channel_mut().add_reliable(MsgType::Synchronize, payload.data());
                    let transport = gc.transport_handle();
                    gc.channel_mut().try_send_reliable(transport.as_ref(), combined_salt);
                    self.last_resend_tick = Some(now);
                }

                while let Some((mut buf, _from)) = gc.transport().recv(NetSrc::Client) {
                    let mut magic = 0u16;
                    if !buf.read_u16(&mut magic) {
                        continue;
                    }
                    if magic != RELIABLE_MAGIC {
                        continue;
                    }
                    let Some(received) = gc.channel_mut().process_header(&mut buf, combined_salt) else {
                        continue;
                    };
                    for rel in received.reliables {
                        if rel.msg_type != MsgType::Synchronize {
                            continue;
                        }
                        let Some(mut inner) = PacketBuffer::from_bytes(&rel.payload) else {
                            continue;
                        };
                        let Some(sync) = Synchronize::deserialize(&mut inner) else {
                            continue;
                        };
                        let rtt = now.saturating_sub(sync.client_tick);
                        let offset = sync.server_tick as i64 + (rtt as i64) / 2 + 1 - now as i64;
                        gc.set_tick_offset(offset);
                        for (id, entity) in sync.entities {
                            gc.seed_entity(id, entity);
                        }
                        self.phase = Phase::Done;
                        return Transition::Push(SessionState::Connected(ConnectedState::new(combined_salt)));
                    }
                }
            }
            Phase::Done => unreachable!("handled above"),
        }

        Transition::Stay
    }

    fn draw(&self, _gc: &GameClient) {}
}

/// Connected to the server: drains reliable/unreliable traffic, turns
/// `Up`/`Down` into `PlayerCommand`s, and draws every known global entity.
pub struct ConnectedState {
    combined_salt: u32,
    pending_commands: Vec<PlayerCommand>,
    snapshots: SnapshotBuffer,
}

impl ConnectedState {
    pub fn new(combined_salt: u32) -> Self {
        Self {
            combined_salt,
            pending_commands: Vec::new(),
            snapshots: SnapshotBuffer::new(SNAPSHOT_HISTORY),
        }
    }

    fn pause(&mut self) {}
    fn resume(&mut self) {}

    fn consume_event(&mut self, ev: InputEvent, gc: &mut GameClient) -> Transition {
        match ev {
            InputEvent::Up => {
                self.pending_commands.push(PlayerCommand { add_rotation: -5.0 });
                Transition::Stay
            }
            InputEvent::Down => {
                self.pending_commands.push(PlayerCommand { add_rotation: 5.0 });
                Transition::Stay
            }
            InputEvent::Enter => Transition::Stay,
            InputEvent::Escape => {
                info!("client: disconnecting");
                for _ in 0..3 {
                    let mut out = PacketBuffer::new();
                    OobMessage::ClientDisconnect {
                        combined_salt: self.combined_salt,
                    }
                    .serialize(&mut out);
                    Channel::send_out_of_band(gc.transport(), NetSrc::Client, NetAddr::SERVER, out.data());
                }
                Transition::Pop
            }
        }
    }

    fn update(&mut self, gc: &mut GameClient) -> Transition {
        while let Some((mut buf, _from)) = gc.transport().recv(NetSrc::Client) {
            let mut magic = 0u16;
            if !buf.read_u16(&mut magic) {
                continue;
            }
            match magic {
                OOB_MAGIC => {
                    if let Some(OobMessage::ServerDisconnect { combined_salt }) = OobMessage::parse(&mut buf) {
                        if combined_salt == self.combined_salt {
                            info!("client: server disconnected us");
                            return Transition::Pop;
                        }
                    }
                }
                RELIABLE_MAGIC => {
                    let Some(received) = gc.channel_mut().process_header(&mut buf, self.combined_salt) else {
                        continue;
                    };
                    for rel in &received.reliables {
                        self.handle_reliable(gc, rel.msg_type, &rel.payload);
                    }
                    if received.msg_type == MsgType::EntitySynchronize {
                        if let Some(snap) = EntitySynchronize::deserialize(&mut buf) {
                            self.snapshots.push(Snapshot {
                                tick: gc.tick(),
                                entities: snap.entities.clone(),
                            });
                            for (id, entity) in snap.entities {
                                gc.seed_entity(id, entity);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let transport = gc.transport_handle();
        for cmd in self.pending_commands.drain(..) {
            let mut payload = PacketBuffer::new();
            cmd.serialize(&mut payload);
            gc.channel_mut().send_unreliable(
                transport.as_ref(),
                MsgType::PlayerCommand,
                payload.data(),
                self.combined_salt,
            );
        }
        gc.channel_mut().try_send_reliable(transport.as_ref(), self.combined_salt);

        Transition::Stay
    }

    fn handle_reliable(&mut self, gc: &mut GameClient, msg_type: MsgType, payload: &[u8]) {
        let Some(mut inner) = PacketBuffer::from_bytes(payload) else {
            return;
        };
        match msg_type {
            MsgType::CreateEntity => {
                if let Some(create) = CreateEntity::deserialize(&mut inner) {
                    gc.seed_entity(create.id, create.entity);
                }
            }
            MsgType::DestroyEntity => {
                if let Some(destroy) = DestroyEntity::deserialize(&mut inner) {
                    gc.forget_entity(destroy.id);
                }
            }
            other => debug!(?other, "client: unexpected reliable message type"),
        }
    }

    fn draw(&self, gc: &GameClient) {
        for id in gc.store().global_ids() {
            if let Some(entity) = gc.store().get_global(id) {
                let position = self.snapshots.interp_entity(id, 1.0).unwrap_or(entity.position);
                gc.renderer().draw_model(&entity.model_name, position, entity.rotation);
            }
        }
    }
}
