//! Interpolation.
//!
//! The server sends discrete `EntitySynchronize` snapshots at tick
//! boundaries. The client renders at its own rate and interpolates entity
//! positions between the two most recent snapshots it has buffered.

use std::collections::VecDeque;

use engine_shared::ecs::{Entity, EntityId};

/// One `EntitySynchronize` payload: the tick it was sent at, and every
/// global entity it covered.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tick: u64,
    pub entities: Vec<(EntityId, Entity)>,
}

impl Snapshot {
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|(eid, _)| *eid == id).map(|(_, e)| e)
    }
}

/// Buffered snapshot history for interpolation.
#[derive(Default)]
pub struct SnapshotBuffer {
    history: VecDeque<Snapshot>,
    max: usize,
}

impl SnapshotBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max,
        }
    }

    pub fn push(&mut self, snap: Snapshot) {
        self.history.push_back(snap);
        while self.history.len() > self.max {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Gets an interpolated position for an entity given a fractional alpha.
    ///
    /// `alpha` should be in $[0,1]$ where 0 = older snapshot, 1 = newer.
    pub fn interp_entity(&self, entity: EntityId, alpha: f32) -> Option<engine_shared::math::Vec3> {
        if self.history.len() < 2 {
            return None;
        }
        let a = &self.history[self.history.len() - 2];
        let b = &self.history[self.history.len() - 1];

        let pa = a.get(entity).map(|e| e.position);
        let pb = b.get(entity).map(|e| e.position);
        match (pa, pb) {
            (Some(pa), Some(pb)) => Some(pa.lerp(pb, alpha)),
            _ => None,
        }
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.history.back()
    }
}

/// Convenience: find entity state in a snapshot.
pub fn find_entity(snap: &Snapshot, id: EntityId) -> Option<&Entity> {
    snap.get(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_shared::math::Vec3;

    fn entity_at(x: f32) -> Entity {
        Entity {
            position: Vec3::new(x, 0.0, 0.0),
            ..Entity::default()
        }
    }

    #[test]
    fn interpolates_between_last_two_snapshots() {
        let mut buf = SnapshotBuffer::new(4);
        let id = EntityId(0);
        buf.push(Snapshot {
            tick: 1,
            entities: vec![(id, entity_at(0.0))],
        });
        buf.push(Snapshot {
            tick: 2,
            entities: vec![(id, entity_at(10.0))],
        });

        let mid = buf.interp_entity(id, 0.5).unwrap();
        assert_eq!(mid, Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn needs_two_snapshots() {
        let mut buf = SnapshotBuffer::new(4);
        buf.push(Snapshot::default());
        assert!(buf.interp_entity(EntityId(0), 0.5).is_none());
    }

    #[test]
    fn respects_max_history() {
        let mut buf = SnapshotBuffer::new(2);
        for tick in 0..5 {
            buf.push(Snapshot {
                tick,
                entities: vec![],
            });
        }
        assert_eq!(buf.len(), 2);
    }
}
