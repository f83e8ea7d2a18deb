//! Session coordinator: the entry point the transport drives.
//!
//! Per-connection state machine:
//!
//! ```text
//!  on_connect                       on_disconnect (from any state)
//! ───────────► Connected ──select──► RoomAssigned ───────────► Disconnected
//! ```
//!
//! Registry and directory share one lock, so room selection, departures
//! and membership reads are linearizable. Outbound events are planned and
//! handed to the transport before the lock is released, so every
//! connection sees events in the order the state changed. Transport sends
//! never await.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::directory::{Departure, RoomDirectory, RoomId};
use crate::error::SignalError;
use crate::protocol::{ClientEvent, PeerSummary, ServerEvent};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::router::{Dispatch, SignalingRouter};
use crate::transport::Transport;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    RoomAssigned(RoomId),
    Disconnected,
}

/// All mutable coordination state, guarded as a unit.
pub struct Session {
    pub registry: ConnectionRegistry,
    pub directory: RoomDirectory,
}

impl Session {
    pub fn new(registry: ConnectionRegistry, directory: RoomDirectory) -> Self {
        Self { registry, directory }
    }

    fn peers_of(&self, room: RoomId) -> Vec<PeerSummary> {
        let Ok(members) = self.directory.members_of(room) else {
            return Vec::new();
        };
        let mut peers: Vec<PeerSummary> = members
            .iter()
            .filter_map(|id| self.registry.lookup(*id).ok())
            .map(|conn| PeerSummary { connection: conn.id(), color: conn.color() })
            .collect();
        peers.sort_by_key(|p| p.connection);
        peers
    }

    fn member_ids(&self, room: RoomId) -> Vec<ConnectionId> {
        self.directory
            .members_of(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Occupancy of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room: RoomId,
    /// Sorted member ids.
    pub members: Vec<ConnectionId>,
}

/// Orchestrates registry, directory and router for transport events.
pub struct SessionCoordinator {
    session: Mutex<Session>,
    router: SignalingRouter,
}

impl SessionCoordinator {
    /// Coordinator with empty state and rooms of `room_capacity`.
    pub fn new(transport: Arc<dyn Transport>, room_capacity: usize) -> Self {
        Self::with_session(
            transport,
            Session::new(ConnectionRegistry::new(), RoomDirectory::new(room_capacity)),
        )
    }

    pub fn with_session(transport: Arc<dyn Transport>, session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            router: SignalingRouter::new(transport),
        }
    }

    /// Register a connection and place it in a room.
    ///
    /// The connection is told its room, id, color and current peers; the
    /// existing members are told about the newcomer. If room selection
    /// fails the registration is rolled back.
    pub async fn on_connect(&self, connection: ConnectionId) -> Result<RoomId, SignalError> {
        let room = {
            let mut guard = self.session.lock().await;
            let session = &mut *guard;

            let conn = session.registry.register(connection)?;
            let room = match session.directory.select_room(&mut session.registry, connection) {
                Ok(room) => room,
                Err(e) => {
                    session.registry.unregister(connection);
                    return Err(e);
                }
            };

            let peers: Vec<PeerSummary> = session
                .peers_of(room)
                .into_iter()
                .filter(|p| p.connection != connection)
                .collect();
            let me = PeerSummary { connection, color: conn.color() };

            let mut dispatch = Dispatch::direct(
                connection,
                ServerEvent::RoomAssigned {
                    room,
                    connection,
                    color: conn.color(),
                    peers,
                },
            );
            dispatch.push_fanout(session.member_ids(room), connection, ServerEvent::PeerJoined(me));
            self.router.deliver(dispatch);
            room
        };

        log::info!("Connection {connection} assigned to {room}");
        Ok(room)
    }

    /// Handle one inbound event.
    ///
    /// On failure the originating connection receives a `rejected` event
    /// and the error is returned for the caller's bookkeeping. Returns the
    /// number of recipients the event was routed to.
    pub async fn on_message(
        &self,
        connection: ConnectionId,
        event: ClientEvent,
    ) -> Result<usize, SignalError> {
        let name = event.name();
        let session = self.session.lock().await;

        match Self::route(&self.router, &session, connection, event) {
            Ok(dispatch) => {
                let recipients = dispatch.recipient_count();
                self.router.deliver(dispatch);
                Ok(recipients)
            }
            Err(e) => {
                log::warn!("Rejected {name:?} from {connection}: {e}");
                self.router
                    .notify(connection, ServerEvent::rejected(e.kind(), e.to_string()));
                Err(e)
            }
        }
    }

    fn route(
        router: &SignalingRouter,
        session: &Session,
        connection: ConnectionId,
        event: ClientEvent,
    ) -> Result<Dispatch, SignalError> {
        let conn = session.registry.lookup(connection)?;
        match event {
            ClientEvent::Ping => Ok(Dispatch::direct(connection, ServerEvent::Pong)),
            ClientEvent::Chat(msg) => match conn.room() {
                Some(room) => router.broadcast_to_room(
                    &session.registry,
                    &session.directory,
                    connection,
                    room,
                    msg,
                ),
                None => {
                    log::debug!("Dropping chat from {connection}: no room assigned");
                    Ok(Dispatch::new())
                }
            },
            ClientEvent::Signal(request) => {
                router.relay_to_peer(&session.registry, connection, request.target, request.data)
            }
        }
    }

    /// Tear down a connection. Safe to call for unknown connections, twice,
    /// or after a partially failed connect. Remaining room members are told
    /// the connection left.
    pub async fn on_disconnect(&self, connection: ConnectionId) -> Option<Departure> {
        let departure = {
            let mut guard = self.session.lock().await;
            let session = &mut *guard;

            let departure = session.directory.leave_room(&mut session.registry, connection);
            session.registry.unregister(connection);

            let mut dispatch = Dispatch::new();
            if let Some(d) = departure {
                if !d.room_closed {
                    dispatch.push_fanout(
                        session.member_ids(d.room),
                        connection,
                        ServerEvent::PeerLeft { connection },
                    );
                }
            }
            self.router.deliver(dispatch);
            departure
        };

        match departure {
            Some(d) => log::info!("Connection {connection} disconnected from {}", d.room),
            None => log::debug!("Connection {connection} disconnected (no room)"),
        }
        departure
    }

    pub async fn phase(&self, connection: ConnectionId) -> SessionPhase {
        let session = self.session.lock().await;
        match session.registry.lookup(connection) {
            Ok(conn) => match conn.room() {
                Some(room) => SessionPhase::RoomAssigned(room),
                None => SessionPhase::Connected,
            },
            Err(_) => SessionPhase::Disconnected,
        }
    }

    /// Rooms in creation order with their members.
    pub async fn snapshot(&self) -> Vec<RoomSnapshot> {
        let session = self.session.lock().await;
        session
            .directory
            .rooms()
            .map(|room| {
                let mut members: Vec<_> = room.members().iter().copied().collect();
                members.sort();
                RoomSnapshot { room: room.id(), members }
            })
            .collect()
    }

    pub async fn room_count(&self) -> usize {
        self.session.lock().await.directory.room_count()
    }

    pub async fn connection_count(&self) -> usize {
        self.session.lock().await.registry.len()
    }

    pub async fn members_of(&self, room: RoomId) -> Result<Vec<ConnectionId>, SignalError> {
        let session = self.session.lock().await;
        let mut members: Vec<_> = session.directory.members_of(room)?.iter().copied().collect();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        sent: StdMutex<Vec<(ConnectionId, ServerEvent)>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<(ConnectionId, ServerEvent)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Transport for Recorder {
        fn send_to(&self, connection: ConnectionId, event: &ServerEvent) -> bool {
            self.sent.lock().unwrap().push((connection, event.clone()));
            true
        }
    }

    fn coordinator(capacity: usize) -> (SessionCoordinator, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let session = Session::new(ConnectionRegistry::with_seed(11), RoomDirectory::new(capacity));
        (SessionCoordinator::with_session(recorder.clone(), session), recorder)
    }

    #[tokio::test]
    async fn test_connect_assigns_room_and_notifies() {
        let (coord, recorder) = coordinator(4);
        let a = ConnectionId::new();
        let room = coord.on_connect(a).await.unwrap();

        assert_eq!(coord.phase(a).await, SessionPhase::RoomAssigned(room));
        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            (to, ServerEvent::RoomAssigned { room: r, connection, peers, .. }) => {
                assert_eq!(*to, a);
                assert_eq!(*r, room);
                assert_eq!(*connection, a);
                assert!(peers.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_connection_sees_first_and_first_hears_join() {
        let (coord, recorder) = coordinator(4);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        coord.on_connect(a).await.unwrap();
        recorder.take();
        coord.on_connect(b).await.unwrap();

        let sent = recorder.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|(to, e)| *to == b
            && matches!(e, ServerEvent::RoomAssigned { peers, .. }
                if peers.len() == 1 && peers[0].connection == a)));
        assert!(sent.iter().any(|(to, e)| *to == a
            && matches!(e, ServerEvent::PeerJoined(p) if p.connection == b)));
    }

    #[tokio::test]
    async fn test_duplicate_connect_is_rejected_without_side_effects() {
        let (coord, _recorder) = coordinator(4);
        let a = ConnectionId::new();
        let room = coord.on_connect(a).await.unwrap();

        assert_eq!(coord.on_connect(a).await, Err(SignalError::DuplicateConnection(a)));
        assert_eq!(coord.members_of(room).await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn test_chat_is_broadcast_within_room() {
        let (coord, recorder) = coordinator(2);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();
        for id in [a, b, c] {
            coord.on_connect(id).await.unwrap();
        }
        recorder.take();

        let recipients = coord.on_message(a, ClientEvent::chat("hey")).await.unwrap();
        assert_eq!(recipients, 1);
        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, b);
        assert!(matches!(&sent[0].1, ServerEvent::Chat { sender, .. } if *sender == a));
    }

    #[tokio::test]
    async fn test_cross_room_signal_is_rejected_to_sender() {
        let (coord, recorder) = coordinator(1);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        coord.on_connect(a).await.unwrap();
        coord.on_connect(b).await.unwrap();
        recorder.take();

        let err = coord
            .on_message(a, ClientEvent::signal(b, json!({"sdp": "offer"})))
            .await
            .unwrap_err();
        assert_eq!(err, SignalError::CrossRoomDenied { sender: a, target: b });

        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, a);
        assert!(matches!(&sent[0].1, ServerEvent::Rejected { kind, .. } if kind == "cross_room_denied"));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (coord, recorder) = coordinator(4);
        let a = ConnectionId::new();
        coord.on_connect(a).await.unwrap();
        recorder.take();

        assert_eq!(coord.on_message(a, ClientEvent::Ping).await.unwrap(), 1);
        assert_eq!(recorder.take(), vec![(a, ServerEvent::Pong)]);
    }

    #[tokio::test]
    async fn test_message_from_unknown_connection() {
        let (coord, _recorder) = coordinator(4);
        let ghost = ConnectionId::new();
        let err = coord.on_message(ghost, ClientEvent::Ping).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_members() {
        let (coord, recorder) = coordinator(4);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let room = coord.on_connect(a).await.unwrap();
        coord.on_connect(b).await.unwrap();
        recorder.take();

        let departure = coord.on_disconnect(a).await.unwrap();
        assert_eq!(departure.room, room);
        assert!(!departure.room_closed);
        assert_eq!(recorder.take(), vec![(b, ServerEvent::PeerLeft { connection: a })]);
        assert_eq!(coord.phase(a).await, SessionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (coord, recorder) = coordinator(4);
        let a = ConnectionId::new();
        coord.on_connect(a).await.unwrap();

        assert!(coord.on_disconnect(a).await.is_some());
        assert!(coord.on_disconnect(a).await.is_none());
        assert!(coord.on_disconnect(ConnectionId::new()).await.is_none());
        assert_eq!(coord.room_count().await, 0);
        assert_eq!(coord.connection_count().await, 0);
        recorder.take();
    }

    /// Records like `Recorder`, but blocks inside the first `room assigned`
    /// send to simulate a busy transport.
    #[derive(Default)]
    struct StallingRecorder {
        inner: Recorder,
        stalling: AtomicBool,
        stalled_once: AtomicBool,
    }

    impl Transport for StallingRecorder {
        fn send_to(&self, connection: ConnectionId, event: &ServerEvent) -> bool {
            if matches!(event, ServerEvent::RoomAssigned { .. })
                && !self.stalled_once.swap(true, Ordering::SeqCst)
            {
                self.stalling.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(200));
            }
            self.inner.send_to(connection, event)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_room_assigned_precedes_later_room_events() {
        let transport = Arc::new(StallingRecorder::default());
        let session = Session::new(ConnectionRegistry::with_seed(3), RoomDirectory::new(4));
        let coord = Arc::new(SessionCoordinator::with_session(transport.clone(), session));
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        let first = tokio::spawn({
            let coord = coord.clone();
            async move { coord.on_connect(a).await }
        });
        while !transport.stalling.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = tokio::spawn({
            let coord = coord.clone();
            async move {
                coord.on_connect(b).await.unwrap();
                coord.on_message(b, ClientEvent::chat("hi")).await.unwrap();
            }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap();

        let to_a: Vec<&'static str> = transport
            .inner
            .take()
            .into_iter()
            .filter(|(to, _)| *to == a)
            .map(|(_, event)| match event {
                ServerEvent::RoomAssigned { .. } => "room assigned",
                ServerEvent::PeerJoined(_) => "peer joined",
                ServerEvent::Chat { .. } => "receive chat msg",
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(to_a, vec!["room assigned", "peer joined", "receive chat msg"]);
    }

    #[tokio::test]
    async fn test_snapshot_in_creation_order() {
        let (coord, _recorder) = coordinator(1);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let ra = coord.on_connect(a).await.unwrap();
        let rb = coord.on_connect(b).await.unwrap();

        let snapshot = coord.snapshot().await;
        assert_eq!(
            snapshot,
            vec![
                RoomSnapshot { room: ra, members: vec![a] },
                RoomSnapshot { room: rb, members: vec![b] },
            ]
        );
    }
}
