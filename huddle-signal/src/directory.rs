//! Room directory: room lifecycle, membership and room selection.
//!
//! Rooms are kept in a `BTreeMap` keyed by a monotonically increasing
//! [`RoomId`], so iteration order is creation order. Selection always
//! fills the earliest-created room that has space, which keeps the number
//! of partially filled rooms low.
//!
//! ```text
//! select_room(c)
//!   ├── room-1 [a b c d]  full
//!   ├── room-3 [e f]      ← c joins here
//!   └── room-4 [g]
//! ```
//!
//! The directory never owns connections. Every mutation updates both the
//! room's member set and the connection's room reference in the
//! [`ConnectionRegistry`], so the two sides always agree.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Default number of participants per room.
pub const DEFAULT_ROOM_CAPACITY: usize = 4;

/// Room identity. Minted from a counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(u64);

impl RoomId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room-{}", self.0)
    }
}

/// A bounded group of connections.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    members: HashSet<ConnectionId>,
    capacity: usize,
}

impl Room {
    fn new(id: RoomId, capacity: usize) -> Self {
        Self {
            id,
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn members(&self) -> &HashSet<ConnectionId> {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn has_space(&self) -> bool {
        self.members.len() < self.capacity
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }
}

/// Result of removing a connection from its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub room: RoomId,
    /// The room was emptied and deleted.
    pub room_closed: bool,
}

/// Owner of all rooms.
pub struct RoomDirectory {
    rooms: BTreeMap<RoomId, Room>,
    capacity: usize,
    next_id: u64,
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CAPACITY)
    }
}

impl RoomDirectory {
    /// Create a directory whose rooms hold at most `capacity` members.
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: BTreeMap::new(),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Assign an unassigned connection to the earliest-created room with
    /// space, creating a room if every existing one is full.
    ///
    /// This is not a move: a connection that already has a room fails with
    /// [`SignalError::AlreadyInRoom`].
    pub fn select_room(
        &mut self,
        registry: &mut ConnectionRegistry,
        connection: ConnectionId,
    ) -> Result<RoomId, SignalError> {
        let conn = registry.lookup_mut(connection)?;
        if let Some(room) = conn.room {
            return Err(SignalError::AlreadyInRoom { connection, room });
        }

        let open = self.rooms.values().find(|r| r.has_space()).map(|r| r.id);
        let room_id = match open {
            Some(id) => id,
            None => self.create_room(),
        };

        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or(SignalError::RoomNotFound(room_id))?;
        room.members.insert(connection);
        conn.room = Some(room_id);

        log::info!(
            "Connection {connection} joined {room_id} ({}/{})",
            room.len(),
            self.capacity
        );
        Ok(room_id)
    }

    fn create_room(&mut self) -> RoomId {
        let id = RoomId(self.next_id);
        self.next_id += 1;
        self.rooms.insert(id, Room::new(id, self.capacity));
        log::debug!("Created {id}");
        id
    }

    /// Remove a connection from its room, if it has one. Empty rooms are
    /// deleted. Connections the registry no longer knows are also purged
    /// from any room that still lists them.
    pub fn leave_room(
        &mut self,
        registry: &mut ConnectionRegistry,
        connection: ConnectionId,
    ) -> Option<Departure> {
        let room_id = match registry.lookup_mut(connection) {
            Ok(conn) => conn.room.take()?,
            Err(_) => self.find_member(connection)?,
        };

        let room = self.rooms.get_mut(&room_id)?;
        room.members.remove(&connection);
        let room_closed = room.is_empty();
        if room_closed {
            self.rooms.remove(&room_id);
            log::info!("{room_id} closed (empty)");
        }

        log::info!("Connection {connection} left {room_id}");
        Some(Departure { room: room_id, room_closed })
    }

    fn find_member(&self, connection: ConnectionId) -> Option<RoomId> {
        self.rooms
            .values()
            .find(|r| r.contains(&connection))
            .map(|r| r.id)
    }

    pub fn members_of(&self, room: RoomId) -> Result<&HashSet<ConnectionId>, SignalError> {
        self.rooms
            .get(&room)
            .map(|r| &r.members)
            .ok_or(SignalError::RoomNotFound(room))
    }

    pub fn room(&self, room: RoomId) -> Option<&Room> {
        self.rooms.get(&room)
    }

    /// Room a connection belongs to, per the directory's side of the
    /// membership relation.
    pub fn room_of(&self, connection: ConnectionId) -> Option<RoomId> {
        self.find_member(connection)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room ids in creation order.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().copied().collect()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }
}
