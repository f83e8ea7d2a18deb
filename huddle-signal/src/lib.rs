//! # huddle-signal: Room-based signaling for peer-to-peer calls
//!
//! Matches WebSocket clients into small call rooms and relays chat and
//! WebRTC signaling messages between members of the same room.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   WebSocket   ┌──────────────┐
//! │ SignalClient │ ◄───────────► │ SignalServer │
//! │ (per user)   │   JSON events │ (transport)  │
//! └──────────────┘               └──────┬───────┘
//!                                       │ on_connect / on_message / on_disconnect
//!                                       ▼
//!                            ┌────────────────────┐
//!                            │ SessionCoordinator │
//!                            └─────────┬──────────┘
//!                  ┌───────────────────┼──────────────────┐
//!                  ▼                   ▼                  ▼
//!       ┌────────────────────┐ ┌───────────────┐ ┌─────────────────┐
//!       │ ConnectionRegistry │ │ RoomDirectory │ │ SignalingRouter │
//!       │ (id, color, room)  │ │ (capacity 4)  │ │ (room / peer)   │
//!       └────────────────────┘ └───────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: live connections and their display colors
//! - [`directory`]: rooms, membership and room selection
//! - [`router`]: chat fan-out and point-to-point signal relay
//! - [`coordinator`]: per-connection state machine driven by the transport
//! - [`transport`]: outbound send primitive and per-connection queues
//! - [`protocol`]: JSON wire envelope
//! - [`server`]: WebSocket server
//! - [`client`]: WebSocket client

pub mod error;
pub mod registry;
pub mod directory;
pub mod router;
pub mod coordinator;
pub mod transport;
pub mod protocol;
pub mod server;
pub mod client;

pub use coordinator::{SessionCoordinator, SessionPhase};
pub use directory::{RoomDirectory, RoomId, DEFAULT_ROOM_CAPACITY};
pub use error::{ProtocolError, SignalError};
pub use registry::{ConnectionId, ConnectionRegistry, DisplayColor};
pub use router::SignalingRouter;
pub use server::{ServerConfig, SignalServer};
