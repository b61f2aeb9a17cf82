//! `engine_server`
//!
//! Server-side systems:
//! - Per-slot connection state machine (Free/Challenging/Connected/Spawned)
//! - Global entity store with reliable create/destroy broadcast
//! - Receives `PlayerCommand`s
//! - Sends `EntitySynchronize` snapshots
//!
//! Networking model: one datagram `Transport`, one salted handshake, one
//! `Channel` per connected slot multiplexing reliable and unreliable traffic.

pub mod server;

pub use server::{GameServer, SlotState};
