//! Entity store.
//!
//! A single fixed-capacity slot table, partitioned by id range: `[0,256)`
//! is *global* (server-authoritative, replicated via reliable create/destroy
//! and unreliable snapshots), `[256,512)` is *local* (client-only, never
//! replicated). One array, one `used` mask — no archetypes, no typed
//! component storages; each slot holds exactly one `Entity`.

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};
use crate::net::PacketBuffer;

pub const MAX_GLOBAL_ENTITIES: usize = 256;
pub const MAX_ENTITIES: usize = MAX_GLOBAL_ENTITIES * 2;

const POSITION_TOLERANCE: f32 = 0.001;
const ROTATION_TOLERANCE: f32 = 0.001;

/// Opaque entity id. `< 256` is global, `>= 256` is local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u16);

impl EntityId {
    pub fn is_global(self) -> bool {
        (self.0 as usize) < MAX_GLOBAL_ENTITIES
    }

    pub fn is_local(self) -> bool {
        !self.is_global()
    }
}

/// A replicated or client-local game object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Entity {
    pub position: Vec3,
    pub rotation: Quat,
    pub model_name: String,
}

impl Entity {
    pub fn serialize(&self, out: &mut PacketBuffer) -> bool {
        out.write_vec3(self.position) && out.write_quat(self.rotation) && out.write_string(&self.model_name)
    }

    pub fn deserialize(buf: &mut PacketBuffer) -> Option<Entity> {
        let mut e = Entity::default();
        if !buf.read_vec3(&mut e.position) {
            return None;
        }
        if !buf.read_quat(&mut e.rotation) {
            return None;
        }
        if !buf.read_string(&mut e.model_name) {
            return None;
        }
        Some(e)
    }

    /// Approximate equality used to compare replicated state: position
    /// magnitude diff under tolerance, rotation dot-product near 1, exact
    /// model name.
    pub fn approx_eq(&self, other: &Entity) -> bool {
        let pos_diff = (self.position.len() - other.position.len()).abs();
        let rot_dot = self.rotation.dot(other.rotation);
        pos_diff < POSITION_TOLERANCE
            && (rot_dot - 1.0).abs() < ROTATION_TOLERANCE
            && self.model_name == other.model_name
    }
}

/// Fixed 512-slot entity table, split into a global and a local id range.
pub struct EntityStore {
    used: [bool; MAX_ENTITIES],
    slots: Vec<Entity>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            used: [false; MAX_ENTITIES],
            slots: (0..MAX_ENTITIES).map(|_| Entity::default()).collect(),
        }
    }

    pub fn is_global(&self, id: EntityId) -> bool {
        id.is_global()
    }

    pub fn is_local(&self, id: EntityId) -> bool {
        id.is_local()
    }

    pub fn exists(&self, id: EntityId) -> bool {
        (id.0 as usize) < MAX_ENTITIES && self.used[id.0 as usize]
    }

    /// Allocates the lowest free id in `[256,512)`. Fails if none are free.
    pub fn alloc_local(&mut self) -> Option<EntityId> {
        for idx in MAX_GLOBAL_ENTITIES..MAX_ENTITIES {
            if !self.used[idx] {
                self.used[idx] = true;
                self.slots[idx] = Entity::default();
                return Some(EntityId(idx as u16));
            }
        }
        None
    }

    pub fn free_local(&mut self, id: EntityId) {
        if id.is_local() && (id.0 as usize) < MAX_ENTITIES {
            self.used[id.0 as usize] = false;
        }
    }

    /// Allocates a specific global id. Fails if `id >= 256` or already used.
    pub fn alloc_global(&mut self, id: EntityId) -> bool {
        if !id.is_global() {
            return false;
        }
        let idx = id.0 as usize;
        if self.used[idx] {
            return false;
        }
        self.used[idx] = true;
        self.slots[idx] = Entity::default();
        true
    }

    /// Lowest free id in `[0,256)`.
    pub fn next_global(&self) -> Option<EntityId> {
        (0..MAX_GLOBAL_ENTITIES)
            .find(|&idx| !self.used[idx])
            .map(|idx| EntityId(idx as u16))
    }

    pub fn free_global(&mut self, id: EntityId) {
        if id.is_global() {
            self.used[id.0 as usize] = false;
        }
    }

    pub fn get_global(&self, id: EntityId) -> Option<&Entity> {
        if id.is_global() && self.exists(id) {
            Some(&self.slots[id.0 as usize])
        } else {
            None
        }
    }

    pub fn get_local(&self, id: EntityId) -> Option<&Entity> {
        if id.is_local() && self.exists(id) {
            Some(&self.slots[id.0 as usize])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        if self.exists(id) {
            Some(&mut self.slots[id.0 as usize])
        } else {
            None
        }
    }

    pub fn global_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..MAX_GLOBAL_ENTITIES)
            .filter(move |&idx| self.used[idx])
            .map(|idx| EntityId(idx as u16))
    }

    pub fn local_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        (MAX_GLOBAL_ENTITIES..MAX_ENTITIES)
            .filter(move |&idx| self.used[idx])
            .map(|idx| EntityId(idx as u16))
    }

    /// Same `used` mask everywhere, and every used slot's entity
    /// approximately equal per `Entity::approx_eq`.
    pub fn approx_eq(&self, other: &EntityStore) -> bool {
        if self.used != other.used {
            return false;
        }
        self.used
            .iter()
            .enumerate()
            .filter(|(_, &u)| u)
            .all(|(idx, _)| self.slots[idx].approx_eq(&other.slots[idx]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_alloc_respects_range() {
        let mut store = EntityStore::new();
        assert!(store.alloc_global(EntityId(0)));
        assert!(!store.alloc_global(EntityId(256)));
        assert!(!store.alloc_global(EntityId(0)));
    }

    #[test]
    fn local_alloc_never_returns_below_256() {
        let mut store = EntityStore::new();
        let id = store.alloc_local().unwrap();
        assert!(id.0 >= 256);
    }

    #[test]
    fn freed_id_is_absent() {
        let mut store = EntityStore::new();
        store.alloc_global(EntityId(5));
        store.free_global(EntityId(5));
        assert!(store.get_global(EntityId(5)).is_none());
        assert!(!store.exists(EntityId(5)));
    }

    #[test]
    fn next_global_is_lowest_free() {
        let mut store = EntityStore::new();
        store.alloc_global(EntityId(0));
        store.alloc_global(EntityId(1));
        assert_eq!(store.next_global(), Some(EntityId(2)));
    }

    #[test]
    fn approx_eq_tolerates_small_drift() {
        let mut a = EntityStore::new();
        let mut b = EntityStore::new();
        a.alloc_global(EntityId(0));
        b.alloc_global(EntityId(0));
        a.get_mut(EntityId(0)).unwrap().position = Vec3::new(1.0, 0.0, 0.0);
        b.get_mut(EntityId(0)).unwrap().position = Vec3::new(1.0005, 0.0, 0.0);
        assert!(a.approx_eq(&b));
    }
}
