//! Small wire payloads shared between client and server session code.
//!
//! Framing (magic numbers, acks, reliability) lives in [`crate::net`]; this
//! module only has the application-level messages carried inside a frame,
//! plus the out-of-band handshake command grammar.

use crate::ecs::{Entity, EntityId};
use crate::net::{oob, PacketBuffer};

/// Unreliable `PlayerCommand` payload: the only input the client sends.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerCommand {
    pub add_rotation: f32,
}

impl PlayerCommand {
    pub fn serialize(&self, out: &mut PacketBuffer) -> bool {
        out.write_f32(self.add_rotation)
    }

    pub fn deserialize(buf: &mut PacketBuffer) -> Option<PlayerCommand> {
        let mut add_rotation = 0f32;
        if !buf.read_f32(&mut add_rotation) {
            return None;
        }
        Some(PlayerCommand { add_rotation })
    }
}

/// Unreliable `EntitySynchronize` payload: a full snapshot of every global
/// entity, sent once per server tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySynchronize {
    pub entities: Vec<(EntityId, Entity)>,
}

impl EntitySynchronize {
    pub fn serialize(&self, out: &mut PacketBuffer) -> bool {
        if self.entities.len() > u16::MAX as usize {
            return false;
        }
        if !out.write_u16(self.entities.len() as u16) {
            return false;
        }
        for (id, entity) in &self.entities {
            if !out.write_u16(id.0) || !entity.serialize(out) {
                return false;
            }
        }
        true
    }

    pub fn deserialize(buf: &mut PacketBuffer) -> Option<EntitySynchronize> {
        let mut n = 0u16;
        if !buf.read_u16(&mut n) {
            return None;
        }
        let mut entities = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let mut id = 0u16;
            if !buf.read_u16(&mut id) {
                return None;
            }
            let entity = Entity::deserialize(buf)?;
            entities.push((EntityId(id), entity));
        }
        Some(EntitySynchronize { entities })
    }
}

/// Reliable `CreateEntity` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateEntity {
    pub id: EntityId,
    pub entity: Entity,
}

impl CreateEntity {
    pub fn serialize(&self, out: &mut PacketBuffer) -> bool {
        out.write_u16(self.id.0) && self.entity.serialize(out)
    }

    pub fn deserialize(buf: &mut PacketBuffer) -> Option<CreateEntity> {
        let mut id = 0u16;
        if !buf.read_u16(&mut id) {
            return None;
        }
        let entity = Entity::deserialize(buf)?;
        Some(CreateEntity {
            id: EntityId(id),
            entity,
        })
    }
}

/// Reliable `DestroyEntity` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestroyEntity {
    pub id: EntityId,
}

impl DestroyEntity {
    pub fn serialize(&self, out: &mut PacketBuffer) -> bool {
        out.write_u16(self.id.0)
    }

    pub fn deserialize(buf: &mut PacketBuffer) -> Option<DestroyEntity> {
        let mut id = 0u16;
        if !buf.read_u16(&mut id) {
            return None;
        }
        Some(DestroyEntity { id: EntityId(id) })
    }
}

/// Reliable `Synchronize` payload. The client sends `client_tick` with the
/// entity list empty; the server echoes `client_tick` back, fills in
/// `server_tick`, and attaches every global entity so the client can seed
/// its store without waiting for the next `EntitySynchronize`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synchronize {
    pub client_tick: u64,
    pub server_tick: u64,
    pub entities: Vec<(EntityId, Entity)>,
}

impl Synchronize {
    pub fn serialize(&self, out: &mut PacketBuffer) -> bool {
        if self.entities.len() > u16::MAX as usize {
            return false;
        }
        if !out.write_u64(self.client_tick) || !out.write_u64(self.server_tick) {
            return false;
        }
        if !out.write_u16(self.entities.len() as u16) {
            return false;
        }
        for (id, entity) in &self.entities {
            if !out.write_u16(id.0) || !entity.serialize(out) {
                return false;
            }
        }
        true
    }

    pub fn deserialize(buf: &mut PacketBuffer) -> Option<Synchronize> {
        let mut client_tick = 0u64;
        let mut server_tick = 0u64;
        if !buf.read_u64(&mut client_tick) || !buf.read_u64(&mut server_tick) {
            return None;
        }
        let mut n = 0u16;
        if !buf.read_u16(&mut n) {
            return None;
        }
        let mut entities = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let mut id = 0u16;
            if !buf.read_u16(&mut id) {
                return None;
            }
            let entity = Entity::deserialize(buf)?;
            entities.push((EntityId(id), entity));
        }
        Some(Synchronize {
            client_tick,
            server_tick,
            entities,
        })
    }
}

/// The out-of-band handshake/disconnect command grammar: a NUL-terminated
/// ASCII verb (see [`crate::net::oob`]) followed by raw binary arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OobMessage {
    ClientConnect { client_salt: u32 },
    ClientChallenge { combined_salt: u32 },
    ClientDisconnect { combined_salt: u32 },
    ServerChallenge { client_salt: u32, server_salt: u32 },
    ServerConnect { combined_salt: u32 },
    ServerDisconnect { combined_salt: u32 },
    ServerNoRoom,
}

impl OobMessage {
    /// Serializes the verb plus arguments. The caller still has to prepend
    /// `OOB_MAGIC`; see [`crate::net::Channel::send_out_of_band`].
    pub fn serialize(&self, out: &mut PacketBuffer) -> bool {
        match self {
            OobMessage::ClientConnect { client_salt } => {
                out.write_string(oob::CLIENT_CONNECT) && out.write_u32(*client_salt)
            }
            OobMessage::ClientChallenge { combined_salt } => {
                out.write_string(oob::CLIENT_CHALLENGE) && out.write_u32(*combined_salt)
            }
            OobMessage::ClientDisconnect { combined_salt } => {
                out.write_string(oob::CLIENT_DISCONNECT) && out.write_u32(*combined_salt)
            }
            OobMessage::ServerChallenge {
                client_salt,
                server_salt,
            } => {
                out.write_string(oob::SERVER_CHALLENGE)
                    && out.write_u32(*client_salt)
                    && out.write_u32(*server_salt)
            }
            OobMessage::ServerConnect { combined_salt } => {
                out.write_string(oob::SERVER_CONNECT) && out.write_u32(*combined_salt)
            }
            OobMessage::ServerDisconnect { combined_salt } => {
                out.write_string(oob::SERVER_DISCONNECT) && out.write_u32(*combined_salt)
            }
            OobMessage::ServerNoRoom => out.write_string(oob::SERVER_NOROOM),
        }
    }

    pub fn parse(buf: &mut PacketBuffer) -> Option<OobMessage> {
        let mut verb = String::new();
        if !buf.read_string(&mut verb) {
            return None;
        }
        match verb.as_str() {
            oob::CLIENT_CONNECT => {
                let mut client_salt = 0u32;
                buf.read_u32(&mut client_salt)
                    .then_some(OobMessage::ClientConnect { client_salt })
            }
            oob::CLIENT_CHALLENGE => {
                let mut combined_salt = 0u32;
                buf.read_u32(&mut combined_salt)
                    .then_some(OobMessage::ClientChallenge { combined_salt })
            }
            oob::CLIENT_DISCONNECT => {
                let mut combined_salt = 0u32;
                buf.read_u32(&mut combined_salt)
                    .then_some(OobMessage::ClientDisconnect { combined_salt })
            }
            oob::SERVER_CHALLENGE => {
                let mut client_salt = 0u32;
                let mut server_salt = 0u32;
                if !buf.read_u32(&mut client_salt) || !buf.read_u32(&mut server_salt) {
                    return None;
                }
                Some(OobMessage::ServerChallenge {
                    client_salt,
                    server_salt,
                })
            }
            oob::SERVER_CONNECT => {
                let mut combined_salt = 0u32;
                buf.read_u32(&mut combined_salt)
                    .then_some(OobMessage::ServerConnect { combined_salt })
            }
            oob::SERVER_DISCONNECT => {
                let mut combined_salt = 0u32;
                buf.read_u32(&mut combined_salt)
                    .then_some(OobMessage::ServerDisconnect { combined_salt })
            }
            oob::SERVER_NOROOM => Some(OobMessage::ServerNoRoom),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Quat, Vec3};

    #[test]
    fn player_command_roundtrip() {
        let mut buf = PacketBuffer::new();
        PlayerCommand { add_rotation: -5.0 }.serialize(&mut buf);
        buf.begin_read();
        let cmd = PlayerCommand::deserialize(&mut buf).unwrap();
        assert_eq!(cmd.add_rotation, -5.0);
    }

    #[test]
    fn entity_synchronize_roundtrip() {
        let entity = Entity {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::default(),
            model_name: "tank".to_string(),
        };
        let snap = EntitySynchronize {
            entities: vec![(EntityId(0), entity), (EntityId(1), Entity::default())],
        };
        let mut buf = PacketBuffer::new();
        assert!(snap.serialize(&mut buf));
        buf.begin_read();
        let back = EntitySynchronize::deserialize(&mut buf).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn oob_client_connect_roundtrip() {
        let msg = OobMessage::ClientConnect {
            client_salt: 0xA1B2C3D4,
        };
        let mut buf = PacketBuffer::new();
        assert!(msg.serialize(&mut buf));
        buf.begin_read();
        assert_eq!(OobMessage::parse(&mut buf), Some(msg));
    }

    #[test]
    fn oob_server_noroom_roundtrip() {
        let mut buf = PacketBuffer::new();
        assert!(OobMessage::ServerNoRoom.serialize(&mut buf));
        buf.begin_read();
        assert_eq!(OobMessage::parse(&mut buf), Some(OobMessage::ServerNoRoom));
    }

    #[test]
    fn oob_unknown_verb_rejected() {
        let mut buf = PacketBuffer::new();
        buf.write_string("not_a_real_command");
        buf.begin_read();
        assert_eq!(OobMessage::parse(&mut buf), None);
    }
}
