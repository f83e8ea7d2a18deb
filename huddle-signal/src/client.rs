//! WebSocket client for the signaling server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Chat and targeted signal sends
//! - Typed server events on an `mpsc` channel
//! - The identity the server assigned (connection id, room, color)

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::directory::RoomId;
use crate::error::ProtocolError;
use crate::protocol::{ClientEvent, Payload, ServerEvent};
use crate::registry::{ConnectionId, DisplayColor};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// Socket established
    Connected,
    /// Socket lost or closed
    Disconnected,
    /// Event from the server
    Received(ServerEvent),
}

/// What the server told us about ourselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub connection: ConnectionId,
    pub room: RoomId,
    pub color: DisplayColor,
}

/// The signaling client.
pub struct SignalClient {
    /// Server WebSocket URL
    server_url: String,

    /// Current connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Identity from the last `room assigned` event
    assignment: Arc<RwLock<Option<Assignment>>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    /// Event receiver, handed out once by `take_event_rx`
    event_rx: Option<mpsc::Receiver<SignalEvent>>,

    /// Event sender used by the reader task
    event_tx: mpsc::Sender<SignalEvent>,
}

impl SignalClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            assignment: Arc::new(RwLock::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SignalEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Connect(e));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel, close the socket when
        // the channel is dropped.
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SignalEvent::Connected).await;

        // Reader task: decode server events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let assignment = self.assignment.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                };

                let event = match ServerEvent::decode(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Ignoring undecodable server frame: {e}");
                        continue;
                    }
                };

                if let ServerEvent::RoomAssigned { room, connection, color, .. } = &event {
                    *assignment.write().await = Some(Assignment {
                        connection: *connection,
                        room: *room,
                        color: *color,
                    });
                }

                if event_tx.send(SignalEvent::Received(event)).await.is_err() {
                    break;
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SignalEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. The writer task sends a close frame.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn send_event(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let encoded = event.encode()?;
        self.send_text(encoded).await
    }

    /// Send a raw text frame, bypassing event encoding.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        let text: String = text.into();
        tx.send(Message::Text(text.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Send a chat message to the rest of the room.
    pub async fn send_chat(&self, msg: impl Into<Payload>) -> Result<(), ProtocolError> {
        self.send_event(&ClientEvent::chat(msg)).await
    }

    /// Send a signaling payload to one peer.
    pub async fn send_signal(
        &self,
        target: ConnectionId,
        data: impl Into<Payload>,
    ) -> Result<(), ProtocolError> {
        self.send_event(&ClientEvent::signal(target, data)).await
    }

    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send_event(&ClientEvent::Ping).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Identity assigned by the server, once `room assigned` has arrived.
    pub async fn assignment(&self) -> Option<Assignment> {
        *self.assignment.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
