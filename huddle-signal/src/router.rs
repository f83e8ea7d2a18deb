//! Signaling router: decides who receives an inbound event.
//!
//! Routing happens in two steps. Planning (`broadcast_to_room`,
//! `relay_to_peer`) reads registry and directory state and produces a
//! [`Dispatch`]; it runs while the session lock is held. Delivery
//! ([`SignalingRouter::deliver`]) hands the dispatch to the transport
//! before the lock is released; transport sends only enqueue.

use std::sync::Arc;

use crate::directory::{RoomDirectory, RoomId};
use crate::error::SignalError;
use crate::protocol::{Payload, ServerEvent};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::transport::Transport;

/// One planned send.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Exactly one recipient.
    Direct { to: ConnectionId, event: ServerEvent },
    /// Every listed member except `exclude`.
    Fanout {
        members: Vec<ConnectionId>,
        exclude: ConnectionId,
        event: ServerEvent,
    },
}

impl Delivery {
    /// Connections this delivery targets.
    pub fn recipients(&self) -> Vec<ConnectionId> {
        match self {
            Self::Direct { to, .. } => vec![*to],
            Self::Fanout { members, exclude, .. } => {
                members.iter().copied().filter(|m| m != exclude).collect()
            }
        }
    }

    pub fn event(&self) -> &ServerEvent {
        match self {
            Self::Direct { event, .. } | Self::Fanout { event, .. } => event,
        }
    }
}

/// Batch of sends planned under the session lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    deliveries: Vec<Delivery>,
}

impl Dispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direct(to: ConnectionId, event: ServerEvent) -> Self {
        let mut dispatch = Self::new();
        dispatch.push_direct(to, event);
        dispatch
    }

    pub fn push_direct(&mut self, to: ConnectionId, event: ServerEvent) {
        self.deliveries.push(Delivery::Direct { to, event });
    }

    /// Queue a fan-out. Skipped when nobody but `exclude` would receive it.
    pub fn push_fanout(&mut self, members: Vec<ConnectionId>, exclude: ConnectionId, event: ServerEvent) {
        if members.iter().any(|m| *m != exclude) {
            self.deliveries.push(Delivery::Fanout { members, exclude, event });
        }
    }

    pub fn extend(&mut self, other: Dispatch) {
        self.deliveries.extend(other.deliveries);
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Total number of recipients across all deliveries.
    pub fn recipient_count(&self) -> usize {
        self.deliveries.iter().map(|d| d.recipients().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

/// Routes chat and signaling events to their audience.
pub struct SignalingRouter {
    transport: Arc<dyn Transport>,
}

impl SignalingRouter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Plan delivery of a chat payload to every member of `room` except
    /// the sender, tagged with the sender's id and color.
    pub fn broadcast_to_room(
        &self,
        registry: &ConnectionRegistry,
        directory: &RoomDirectory,
        sender: ConnectionId,
        room: RoomId,
        payload: Payload,
    ) -> Result<Dispatch, SignalError> {
        let conn = registry.lookup(sender)?;
        let members = directory.members_of(room)?;
        if !members.contains(&sender) {
            return Err(SignalError::NotInRoom { connection: sender, room });
        }

        let event = ServerEvent::Chat {
            sender,
            color: conn.color(),
            msg: payload,
        };
        let mut dispatch = Dispatch::new();
        dispatch.push_fanout(members.iter().copied().collect(), sender, event);

        log::debug!(
            "Chat from {sender} in {room} → {} recipient(s)",
            dispatch.recipient_count()
        );
        Ok(dispatch)
    }

    /// Plan point-to-point delivery of a signaling payload. Sender and
    /// target must share a room.
    pub fn relay_to_peer(
        &self,
        registry: &ConnectionRegistry,
        sender: ConnectionId,
        target: ConnectionId,
        payload: Payload,
    ) -> Result<Dispatch, SignalError> {
        let sender_room = registry.lookup(sender)?.room();
        let target_room = registry.lookup(target)?.room();

        match (sender_room, target_room) {
            (Some(a), Some(b)) if a == b => {
                log::trace!("Relaying signal {sender} → {target} in {a}");
                Ok(Dispatch::direct(target, ServerEvent::Signal { sender, data: payload }))
            }
            _ => Err(SignalError::CrossRoomDenied { sender, target }),
        }
    }

    /// Hand a planned dispatch to the transport. Returns the number of
    /// sends the transport accepted.
    pub fn deliver(&self, dispatch: Dispatch) -> usize {
        dispatch
            .deliveries
            .iter()
            .map(|delivery| match delivery {
                Delivery::Direct { to, event } => usize::from(self.transport.send_to(*to, event)),
                Delivery::Fanout { members, exclude, event } => {
                    self.transport.broadcast_except(members, *exclude, event)
                }
            })
            .sum()
    }

    /// Send a single event immediately.
    pub fn notify(&self, to: ConnectionId, event: ServerEvent) -> bool {
        self.transport.send_to(to, &event)
    }
}
