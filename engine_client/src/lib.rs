//! `engine_client`
//!
//! Client-side systems:
//! - A LIFO session state stack: `Menu` / `Connecting` / `Connected`
//! - Salted handshake and clock sync against one server
//! - Input capture, edge-triggered into session events
//! - Rendering abstraction wiring (`Renderer` trait, no-op by default)

pub mod client;
pub mod input;
pub mod interp;

pub use client::{GameClient, InputEvent, NullRenderer, Renderer};
