//! Error types for room coordination and the wire protocol.

use thiserror::Error;

use crate::registry::ConnectionId;
use crate::directory::RoomId;

/// Failures of registry, directory and routing operations.
///
/// All of these are recoverable: the coordinator reports them back to the
/// originating connection and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("connection {connection} is already in {room}")]
    AlreadyInRoom { connection: ConnectionId, room: RoomId },
    #[error("connection {connection} is not a member of {room}")]
    NotInRoom { connection: ConnectionId, room: RoomId },
    #[error("connection {sender} may not reach {target} outside its room")]
    CrossRoomDenied { sender: ConnectionId, target: ConnectionId },
}

impl SignalError {
    /// Short machine-readable tag, sent to clients in `rejected` events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateConnection(_) => "duplicate_connection",
            Self::ConnectionNotFound(_) | Self::RoomNotFound(_) => "not_found",
            Self::AlreadyInRoom { .. } => "already_in_room",
            Self::NotInRoom { .. } => "not_in_room",
            Self::CrossRoomDenied { .. } => "cross_room_denied",
        }
    }

    /// Whether this is a lookup miss (connection or room).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ConnectionNotFound(_) | Self::RoomNotFound(_))
    }
}

/// Wire protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("websocket handshake failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    ConnectionClosed,
}
