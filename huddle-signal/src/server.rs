//! WebSocket signaling server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                      ┌── ConnectionRegistry
//!             ├── SessionCoordinator ┼── RoomDirectory
//! Client B ──┘          │            └── SignalingRouter
//!                       ▼
//!                ChannelTransport (per-connection queues)
//!                       │
//!            ┌──────────┼───────────┐
//!            ▼          ▼           ▼
//!         Client A   Client B    Client C
//! ```
//!
//! Each accepted socket gets a fresh [`ConnectionId`] and runs a single task
//! that multiplexes inbound frames and its outbound queue. Socket open and
//! close become `on_connect` / `on_disconnect`; text and binary frames are
//! decoded as [`ClientEvent`]s and passed to `on_message`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::coordinator::SessionCoordinator;
use crate::directory::DEFAULT_ROOM_CAPACITY;
use crate::error::ProtocolError;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ConnectionId;
use crate::transport::{ChannelTransport, Transport, TransportStats};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum participants per room
    pub room_capacity: usize,
    /// Frames queued per connection before it is evicted as a slow consumer
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            room_capacity: DEFAULT_ROOM_CAPACITY,
            outbound_buffer: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_messages: u64,
    pub active_rooms: usize,
}

/// The signaling server.
pub struct SignalServer {
    config: ServerConfig,
    coordinator: Arc<SessionCoordinator>,
    transport: Arc<ChannelTransport>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SignalServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let transport = Arc::new(ChannelTransport::new(config.outbound_buffer));
        let coordinator = Arc::new(SessionCoordinator::new(
            transport.clone(),
            config.room_capacity,
        ));
        Self {
            config,
            coordinator,
            transport,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!(
            "Signal server listening on {} (room capacity {})",
            listener.local_addr()?,
            self.config.room_capacity
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let coordinator = self.coordinator.clone();
            let transport = self.transport.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, coordinator, transport, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to teardown.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        coordinator: Arc<SessionCoordinator>,
        transport: Arc<ChannelTransport>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let connection = ConnectionId::new();
        log::info!("WebSocket connection {connection} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let outbox = transport.attach(connection);
        let result = match coordinator.on_connect(connection).await {
            Ok(_) => {
                let pumped =
                    Self::pump(ws_stream, connection, outbox, &coordinator, &transport, &stats).await;
                // Teardown runs even if the pump failed.
                coordinator.on_disconnect(connection).await;
                pumped
            }
            Err(e) => {
                log::warn!("Refusing connection {connection} from {addr}: {e}");
                Ok(())
            }
        };
        transport.detach(connection);
        let active_rooms = coordinator.room_count().await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = active_rooms;
        }
        log::info!("Connection {connection} from {addr} closed");

        result
    }

    /// Multiplex inbound frames and the outbound queue until either side ends.
    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        connection: ConnectionId,
        mut outbox: mpsc::Receiver<Message>,
        coordinator: &SessionCoordinator,
        transport: &ChannelTransport,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let active_rooms = coordinator.room_count().await;
        stats.write().await.active_rooms = active_rooms;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let decoded = ClientEvent::decode(text.as_str());
                            Self::handle_frame(connection, decoded, text.len(), coordinator, transport, stats).await;
                        }

                        Some(Ok(Message::Binary(data))) => {
                            let decoded = ClientEvent::decode_bytes(&data);
                            Self::handle_frame(connection, decoded, data.len(), coordinator, transport, stats).await;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection {connection} closed by peer");
                            break;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error on {connection}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                out = outbox.recv() => {
                    match out {
                        Some(frame) => ws_sender.send(frame).await?,
                        None => {
                            log::warn!("Outbound queue for {connection} closed, dropping connection");
                            break;
                        }
                    }
                }
            }
        }

        let _ = ws_sender.close().await;
        Ok(())
    }

    async fn handle_frame(
        connection: ConnectionId,
        decoded: Result<ClientEvent, ProtocolError>,
        len: usize,
        coordinator: &SessionCoordinator,
        transport: &ChannelTransport,
        stats: &RwLock<ServerStats>,
    ) {
        {
            let mut s = stats.write().await;
            s.total_messages += 1;
            s.total_bytes += len as u64;
        }

        let rejected = match decoded {
            Ok(event) => {
                log::trace!("{connection} → {}", event.name());
                coordinator.on_message(connection, event).await.is_err()
            }
            Err(e) => {
                log::warn!("Failed to decode frame from {connection}: {e}");
                transport.send_to(connection, &ServerEvent::rejected("malformed", e.to_string()));
                true
            }
        };

        if rejected {
            stats.write().await.rejected_messages += 1;
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get transport counters.
    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the coordinator handling this server's sessions.
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }
}
