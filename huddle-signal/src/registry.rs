//! Connection registry: identity → per-connection state.
//!
//! The registry owns every live [`Connection`]. Rooms only ever refer to
//! connections by [`ConnectionId`].

use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::RoomId;
use crate::error::SignalError;

/// Upper bound (inclusive) of the 24-bit color space.
pub const MAX_COLOR: u32 = 0xFF_FFFF;

/// Opaque connection identity, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cosmetic 24-bit RGB color assigned at connect time.
///
/// Serialized as a plain integer; rendered as `#rrggbb` for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayColor(u32);

impl DisplayColor {
    /// Build a color, masking anything above 24 bits.
    pub fn new(rgb: u32) -> Self {
        Self(rgb & MAX_COLOR)
    }

    pub fn rgb(&self) -> u32 {
        self.0
    }

    pub fn to_hex(&self) -> String {
        format!("#{:06x}", self.0)
    }
}

impl fmt::Display for DisplayColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

/// A live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: ConnectionId,
    color: DisplayColor,
    pub(crate) room: Option<RoomId>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn color(&self) -> DisplayColor {
        self.color
    }

    /// Room this connection currently belongs to, if any.
    pub fn room(&self) -> Option<RoomId> {
        self.room
    }
}

/// Authoritative map of live connections.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    rng: StdRng,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Registry with a deterministic color sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            connections: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Register a new connection with a freshly drawn color.
    pub fn register(&mut self, id: ConnectionId) -> Result<Connection, SignalError> {
        if self.connections.contains_key(&id) {
            return Err(SignalError::DuplicateConnection(id));
        }

        let color = DisplayColor::new(self.rng.gen_range(0..=MAX_COLOR));
        let connection = Connection { id, color, room: None };
        self.connections.insert(id, connection.clone());

        log::debug!("Registered connection {id} with color {color}");
        Ok(connection)
    }

    pub fn lookup(&self, id: ConnectionId) -> Result<&Connection, SignalError> {
        self.connections
            .get(&id)
            .ok_or(SignalError::ConnectionNotFound(id))
    }

    pub(crate) fn lookup_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, SignalError> {
        self.connections
            .get_mut(&id)
            .ok_or(SignalError::ConnectionNotFound(id))
    }

    /// Remove a connection. Unknown ids are ignored, since disconnect
    /// notifications may arrive twice.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            log::debug!("Unregistered connection {id}");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }
}
