//! JSON wire protocol.
//!
//! Every frame is an envelope naming the event and carrying its data:
//!
//! ```text
//! {"eventName": "chat msg", "data": "hello"}
//! {"eventName": "signal",   "data": {"target": "<uuid>", "data": {...}}}
//! {"eventName": "ping"}
//! ```
//!
//! Chat and signal payloads are opaque to the server; they are forwarded
//! untouched, tagged with the sender's identity.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directory::RoomId;
use crate::error::ProtocolError;
use crate::registry::{ConnectionId, DisplayColor};

/// Opaque application payload.
pub type Payload = Value;

/// Targeted signaling request (session descriptions, ICE candidates, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    pub target: ConnectionId,
    pub data: Payload,
}

/// Events sent by clients.
///
/// A missing `data` field reads as `null`, so `{"eventName":"chat msg"}`
/// is an empty chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "eventName", content = "data")]
pub enum ClientEvent {
    /// Chat message for everyone else in the room.
    #[serde(rename = "chat msg")]
    Chat(Payload),
    /// Point-to-point signaling message.
    #[serde(rename = "signal")]
    Signal(SignalRequest),
    #[serde(rename = "ping")]
    Ping,
}

impl ClientEvent {
    pub fn chat(msg: impl Into<Payload>) -> Self {
        Self::Chat(msg.into())
    }

    pub fn signal(target: ConnectionId, data: impl Into<Payload>) -> Self {
        Self::Signal(SignalRequest { target, data: data.into() })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat msg",
            Self::Signal(_) => "signal",
            Self::Ping => "ping",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// Decode a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::decode(text)
    }
}

#[derive(Deserialize)]
struct RawClientEvent {
    #[serde(rename = "eventName")]
    event_name: String,
    #[serde(default)]
    data: Value,
}

const CLIENT_EVENT_NAMES: &[&str] = &["chat msg", "signal", "ping"];

impl<'de> Deserialize<'de> for ClientEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawClientEvent::deserialize(deserializer)?;
        match raw.event_name.as_str() {
            "chat msg" => Ok(Self::Chat(raw.data)),
            "signal" => serde_json::from_value(raw.data)
                .map(Self::Signal)
                .map_err(de::Error::custom),
            "ping" => Ok(Self::Ping),
            other => Err(de::Error::unknown_variant(other, CLIENT_EVENT_NAMES)),
        }
    }
}

/// A room member as seen by other members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub connection: ConnectionId,
    pub color: DisplayColor,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventName", content = "data")]
pub enum ServerEvent {
    /// Sent once after connect: who you are, where you are, who is there.
    #[serde(rename = "room assigned")]
    RoomAssigned {
        room: RoomId,
        connection: ConnectionId,
        color: DisplayColor,
        peers: Vec<PeerSummary>,
    },
    #[serde(rename = "peer joined")]
    PeerJoined(PeerSummary),
    #[serde(rename = "peer left")]
    PeerLeft { connection: ConnectionId },
    #[serde(rename = "receive chat msg")]
    Chat {
        sender: ConnectionId,
        color: DisplayColor,
        msg: Payload,
    },
    #[serde(rename = "signal")]
    Signal { sender: ConnectionId, data: Payload },
    /// The originating request was refused.
    #[serde(rename = "rejected")]
    Rejected { kind: String, reason: String },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerEvent {
    pub fn rejected(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected { kind: kind.into(), reason: reason.into() }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }
}
