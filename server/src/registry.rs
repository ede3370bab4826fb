use std::collections::HashMap;
use std::time::SystemTime;

use presence_shared::config::WorldConfig;
use presence_shared::protocol::ConnectionId;
use presence_shared::vec3::{clamp_box, Vec3};

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} has already joined")]
    DuplicateJoin(ConnectionId),
    #[error("connection {0} has no session")]
    NotFound(ConnectionId),
}

/// Authoritative set of joined users, keyed by connection.
///
/// Pure in-memory state: it performs no I/O, and every mutation hands the
/// affected [`Session`] back so the caller can decide what to broadcast.
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
    /// Join order, used for every listing
    order: Vec<ConnectionId>,
    world: WorldConfig,
}

impl SessionRegistry {
    pub fn new(world: WorldConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            world,
        }
    }

    /// Create the session for `id`. A connection joins at most once; a
    /// second attempt leaves the existing entry (and its join time) untouched.
    pub fn register(
        &mut self,
        id: ConnectionId,
        display_name: String,
    ) -> Result<Session, RegistryError> {
        if self.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateJoin(id));
        }

        let session = Session {
            id,
            display_name,
            position: self.world.spawn_position,
            rotation: Vec3::ZERO,
            joined_at: SystemTime::now(),
        };
        self.sessions.insert(id, session.clone());
        self.order.push(id);
        Ok(session)
    }

    /// Replace the stored transform. The position is clamped into the world
    /// bounds so the registry never holds an out-of-range point.
    pub fn update_position(
        &mut self,
        id: ConnectionId,
        position: Vec3,
        rotation: Vec3,
    ) -> Result<Session, RegistryError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        session.position = clamp_box(position, self.world.min, self.world.max);
        session.rotation = rotation;
        Ok(session.clone())
    }

    pub fn remove(&mut self, id: ConnectionId) -> Result<Session, RegistryError> {
        let session = self
            .sessions
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;
        self.order.retain(|other| *other != id);
        Ok(session)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Sessions in join order
    pub fn iter(&self) -> impl Iterator<Item = &Session> + '_ {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }

    /// Snapshot of all sessions in join order.
    pub fn list(&self) -> Vec<Session> {
        self.iter().cloned().collect()
    }

    /// Snapshot of every session except `id`, in join order.
    pub fn others(&self, id: ConnectionId) -> Vec<Session> {
        self.iter().filter(|s| s.id != id).cloned().collect()
    }

    /// Roster: display names in join order.
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|s| s.display_name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
