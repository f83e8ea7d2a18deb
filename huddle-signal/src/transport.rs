//! Outbound side of the transport boundary.
//!
//! The core never touches sockets. It hands events to a [`Transport`],
//! whose `send_to` must not wait: delivery is fire-and-forget.
//!
//! [`ChannelTransport`] backs the WebSocket server. Each connection owns a
//! bounded queue drained by its writer task:
//!
//! ```text
//! router ── send_to(id) ──► [ mpsc queue (256) ] ──► writer task ──► socket
//!                                  │ full
//!                                  ▼
//!                           queue dropped → writer ends → socket closed
//! ```
//!
//! Evicting a consumer that cannot keep up keeps one slow socket from
//! holding memory for the whole room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::ServerEvent;
use crate::registry::ConnectionId;

/// Per-connection send primitive provided by the transport layer.
pub trait Transport: Send + Sync {
    /// Queue `event` for `connection`. Returns whether it was accepted.
    fn send_to(&self, connection: ConnectionId, event: &ServerEvent) -> bool;

    /// Send `event` to every member except `exclude`. Returns the number
    /// of connections that accepted it.
    fn broadcast_except(
        &self,
        members: &[ConnectionId],
        exclude: ConnectionId,
        event: &ServerEvent,
    ) -> usize {
        members
            .iter()
            .filter(|m| **m != exclude)
            .filter(|m| self.send_to(**m, event))
            .count()
    }
}

/// Snapshot of transport counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub evicted: u64,
    pub attached: usize,
}

#[derive(Default)]
struct AtomicTransportStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    evicted: AtomicU64,
}

/// Transport over bounded per-connection `mpsc` queues.
pub struct ChannelTransport {
    outboxes: RwLock<HashMap<ConnectionId, mpsc::Sender<Message>>>,
    buffer: usize,
    stats: AtomicTransportStats,
}

impl ChannelTransport {
    /// `buffer` is the number of frames queued per connection before it is
    /// considered a slow consumer.
    pub fn new(buffer: usize) -> Self {
        Self {
            outboxes: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            stats: AtomicTransportStats::default(),
        }
    }

    /// Open the outbound queue for a connection, replacing any previous one.
    pub fn attach(&self, connection: ConnectionId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.outboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection, tx);
        rx
    }

    /// Close the outbound queue. Returns whether one was open.
    pub fn detach(&self, connection: ConnectionId) -> bool {
        self.outboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection)
            .is_some()
    }

    pub fn is_attached(&self, connection: ConnectionId) -> bool {
        self.outboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&connection)
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            attached: self
                .outboxes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    fn push(&self, connection: ConnectionId, frame: Message) -> bool {
        let result = {
            let outboxes = self.outboxes.read().unwrap_or_else(PoisonError::into_inner);
            match outboxes.get(&connection) {
                Some(tx) => tx.try_send(frame),
                None => {
                    self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::trace!("Dropping frame for detached connection {connection}");
                    return false;
                }
            }
        };

        match result {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!(
                    "Outbound queue for {connection} is full ({} frames), evicting slow consumer",
                    self.buffer
                );
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                if self.detach(connection) {
                    self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                self.detach(connection);
                false
            }
        }
    }
}

fn encode_frame(event: &ServerEvent) -> Option<Message> {
    match event.encode() {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            log::error!("Failed to encode outbound event: {e}");
            None
        }
    }
}

impl Transport for ChannelTransport {
    fn send_to(&self, connection: ConnectionId, event: &ServerEvent) -> bool {
        match encode_frame(event) {
            Some(frame) => self.push(connection, frame),
            None => false,
        }
    }

    /// Encodes once and shares the frame across recipients.
    fn broadcast_except(
        &self,
        members: &[ConnectionId],
        exclude: ConnectionId,
        event: &ServerEvent,
    ) -> usize {
        let Some(frame) = encode_frame(event) else {
            return 0;
        };
        members
            .iter()
            .filter(|m| **m != exclude)
            .filter(|m| self.push(**m, frame.clone()))
            .count()
    }
}
