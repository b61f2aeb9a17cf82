//! Client session: a LIFO stack of states (`Menu` / `Connecting` /
//! `Connected`) driving one [`Channel`] over one [`Transport`].
//!
//! Only the top of the stack ever sees input or runs its update — pushing a
//! state pauses whatever was below it, popping resumes it.

mod renderer;
mod state;

pub use renderer::{NullRenderer, Renderer};
pub use state::InputEvent;
use state::{MenuState, SessionState, Transition};

use std::rc::Rc;

use tracing::debug;

use engine_shared::config::EngineConfig;
use engine_shared::console::{Console, CvarFlags, CvarValue};
use engine_shared::ecs::{Entity, EntityId, EntityStore};
use engine_shared::net::{Channel, NetAddr, NetSrc, Ticker, Transport};

/// High-level game client: one session state stack over one connection.
pub struct GameClient {
    transport: Rc<dyn Transport>,
    channel: Channel,
    store: EntityStore,
    ticker: Ticker,
    console: Console,
    renderer: Box<dyn Renderer>,
    combined_salt: u32,
    stack: Vec<SessionState>,
}

impl GameClient {
    pub fn new(cfg: &EngineConfig, transport: Rc<dyn Transport>, renderer: Box<dyn Renderer>) -> Self {
        let mut console = Console::new();
        console.register_cvar(
            "cl_name",
            CvarValue::String(cfg.player_name.clone()),
            "Player name sent to the server",
            CvarFlags::ARCHIVE,
        );

        let mut ticker = Ticker::new();
        ticker.start();

        Self {
            transport,
            channel: Channel::new(NetSrc::Client),
            store: EntityStore::new(),
            ticker,
            console,
            renderer,
            combined_salt: 0,
            stack: vec![SessionState::Menu(MenuState::new())],
        }
    }

    pub fn tick(&self) -> u64 {
        self.ticker.get_total_ticks()
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// A cheap, independently-owned handle to the transport. Needed
    /// whenever a call site also needs `channel_mut()` in the same
    /// expression — `transport()` borrows all of `self`, which would
    /// otherwise conflict with a simultaneous mutable borrow of `channel`.
    pub fn transport_handle(&self) -> Rc<dyn Transport> {
        Rc::clone(&self.transport)
    }

    pub fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }

    pub fn combined_salt(&self) -> u32 {
        self.combined_salt
    }

    /// Name of the state currently on top of the stack, for `status`.
    pub fn state_name(&self) -> &'static str {
        self.stack.last().map_or("none", SessionState::name)
    }

    pub(crate) fn on_handshake_complete(&mut self, server_addr: NetAddr, combined_salt: u32) {
        self.channel.set_peer(server_addr);
        self.combined_salt = combined_salt;
        self.store = EntityStore::new();
    }

    pub(crate) fn set_tick_offset(&mut self, offset: i64) {
        self.ticker.set_tick_offset(offset);
    }

    pub(crate) fn seed_entity(&mut self, id: EntityId, entity: Entity) {
        if !self.store.exists(id) {
            self.store.alloc_global(id);
        }
        if let Some(slot) = self.store.get_mut(id) {
            *slot = entity;
        }
    }

    pub(crate) fn forget_entity(&mut self, id: EntityId) {
        self.store.free_global(id);
    }

    /// Runs one frame: drives the top-of-stack state's `update`, applying
    /// whatever stack transition it asks for. Cascades through consecutive
    /// `Pop`s in the same frame so a state that immediately drops itself
    /// (see `ConnectingState`'s post-handshake cleanup) resolves without an
    /// extra idle frame.
    pub fn frame(&mut self) {
        loop {
            let Some(mut top) = self.stack.pop() else { return };
            let transition = top.update(self);
            let cascading = matches!(transition, Transition::Pop);
            self.resolve(top, transition);
            if !cascading {
                return;
            }
        }
    }

    /// Delivers one input event to the top of the stack.
    pub fn handle_input(&mut self, ev: InputEvent) {
        let Some(mut top) = self.stack.pop() else { return };
        let transition = top.consume_event(ev, self);
        self.resolve(top, transition);
    }

    pub fn draw(&self) {
        if let Some(top) = self.stack.last() {
            top.draw(self);
        }
    }

    fn resolve(&mut self, top: SessionState, transition: Transition) {
        match transition {
            Transition::Stay => self.stack.push(top),
            Transition::Push(next) => {
                let mut top = top;
                top.pause();
                self.stack.push(top);
                self.stack.push(next);
            }
            Transition::Pop => {
                drop(top);
                if let Some(prev) = self.stack.last_mut() {
                    prev.resume();
                }
            }
        }
    }

    /// Executes a console command line, returning output lines.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => Ok(vec![self.status_line()]),
            "disconnect" => {
                self.handle_input(InputEvent::Escape);
                Ok(vec!["disconnecting".to_string()])
            }
            "quit" | "exit" => {
                debug!("client: quit via console");
                std::process::exit(0);
            }
            _ => self.console.exec(line),
        }
    }

    fn status_line(&self) -> String {
        format!(
            "state={} tick={} combined_salt={:#010x} entities={}",
            self.state_name(),
            self.tick(),
            self.combined_salt,
            self.store.global_ids().count(),
        )
    }
}
