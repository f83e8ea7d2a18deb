//! Room coordination properties, exercised through the coordinator with an
//! in-memory transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use huddle_signal::coordinator::{Session, SessionCoordinator, SessionPhase};
use huddle_signal::directory::RoomDirectory;
use huddle_signal::protocol::{ClientEvent, ServerEvent};
use huddle_signal::registry::{ConnectionId, ConnectionRegistry};
use huddle_signal::transport::Transport;
use huddle_signal::SignalError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Default)]
struct Inbox {
    sent: Mutex<Vec<(ConnectionId, ServerEvent)>>,
}

impl Inbox {
    fn drain(&self) -> Vec<(ConnectionId, ServerEvent)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Transport for Inbox {
    fn send_to(&self, connection: ConnectionId, event: &ServerEvent) -> bool {
        self.sent.lock().unwrap().push((connection, event.clone()));
        true
    }
}

fn coordinator(capacity: usize) -> (SessionCoordinator, Arc<Inbox>) {
    let inbox = Arc::new(Inbox::default());
    let session = Session::new(ConnectionRegistry::with_seed(5), RoomDirectory::new(capacity));
    (SessionCoordinator::with_session(inbox.clone(), session), inbox)
}

#[tokio::test]
async fn test_five_connections_fill_then_spill() {
    let (coord, _inbox) = coordinator(4);
    let ids: Vec<ConnectionId> = (0..5).map(|_| ConnectionId::new()).collect();

    let mut rooms = Vec::new();
    for id in &ids {
        rooms.push(coord.on_connect(*id).await.unwrap());
    }
    let room_a = rooms[0];
    let room_b = rooms[4];

    assert!(rooms[..4].iter().all(|r| *r == room_a));
    assert_ne!(room_a, room_b);
    assert_eq!(coord.members_of(room_a).await.unwrap().len(), 4);
    assert_eq!(coord.members_of(room_b).await.unwrap().len(), 1);

    // C2 leaves: room A drops to three, C2 is forgotten.
    let c2 = ids[1];
    coord.on_disconnect(c2).await;
    assert_eq!(coord.members_of(room_a).await.unwrap().len(), 3);
    assert_eq!(coord.phase(c2).await, SessionPhase::Disconnected);

    // C2 comes back and refills room A, not room B.
    assert_eq!(coord.on_connect(c2).await.unwrap(), room_a);
    assert_eq!(coord.members_of(room_a).await.unwrap().len(), 4);
    assert_eq!(coord.members_of(room_b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fill_order_prefers_older_room() {
    let (coord, _inbox) = coordinator(2);
    let a = ConnectionId::new();
    let b = ConnectionId::new();
    let c = ConnectionId::new();
    let r1 = coord.on_connect(a).await.unwrap();
    coord.on_connect(b).await.unwrap();
    let r2 = coord.on_connect(c).await.unwrap();
    assert_ne!(r1, r2);

    coord.on_disconnect(a).await;
    let d = ConnectionId::new();
    assert_eq!(coord.on_connect(d).await.unwrap(), r1);
}

#[tokio::test]
async fn test_disconnect_of_unknown_connection_is_noop() {
    let (coord, inbox) = coordinator(4);
    let a = ConnectionId::new();
    coord.on_connect(a).await.unwrap();
    inbox.drain();

    assert!(coord.on_disconnect(ConnectionId::new()).await.is_none());
    assert!(inbox.drain().is_empty());
    assert_eq!(coord.connection_count().await, 1);
}

#[tokio::test]
async fn test_broadcast_reaches_exactly_other_members() {
    let (coord, inbox) = coordinator(4);
    let ids: Vec<ConnectionId> = (0..7).map(|_| ConnectionId::new()).collect();
    for id in &ids {
        coord.on_connect(*id).await.unwrap();
    }
    inbox.drain();

    let sender = ids[0];
    let sender_room = match coord.phase(sender).await {
        SessionPhase::RoomAssigned(room) => room,
        other => panic!("unexpected phase {other:?}"),
    };
    let room_members = coord.members_of(sender_room).await.unwrap();

    let recipients = coord.on_message(sender, ClientEvent::chat("hello")).await.unwrap();
    assert_eq!(recipients, room_members.len() - 1);

    let sent = inbox.drain();
    assert_eq!(sent.len(), room_members.len() - 1);
    for (to, event) in sent {
        assert_ne!(to, sender);
        assert!(room_members.contains(&to));
        assert!(matches!(event, ServerEvent::Chat { sender: s, .. } if s == sender));
    }
}

#[tokio::test]
async fn test_relay_across_rooms_is_denied() {
    let (coord, inbox) = coordinator(4);
    let ids: Vec<ConnectionId> = (0..5).map(|_| ConnectionId::new()).collect();
    for id in &ids {
        coord.on_connect(*id).await.unwrap();
    }
    inbox.drain();

    let in_a = ids[0];
    let in_b = ids[4];
    let err = coord
        .on_message(in_a, ClientEvent::signal(in_b, "offer"))
        .await
        .unwrap_err();
    assert_eq!(err, SignalError::CrossRoomDenied { sender: in_a, target: in_b });

    let sent = inbox.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, in_a);
}

#[tokio::test]
async fn test_random_churn_respects_capacity_and_consistency() {
    let capacity = 4;
    let (coord, _inbox) = coordinator(capacity);
    let mut rng = StdRng::seed_from_u64(99);
    let mut live: Vec<ConnectionId> = Vec::new();

    for _ in 0..500 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let id = ConnectionId::new();
            coord.on_connect(id).await.unwrap();
            live.push(id);
        } else {
            let idx = rng.gen_range(0..live.len());
            let id = live.swap_remove(idx);
            coord.on_disconnect(id).await;
        }

        let snapshot = coord.snapshot().await;
        let mut seen: HashMap<ConnectionId, _> = HashMap::new();
        for room in &snapshot {
            assert!(!room.members.is_empty());
            assert!(room.members.len() <= capacity);
            for member in &room.members {
                assert!(seen.insert(*member, room.room).is_none(), "member in two rooms");
                assert_eq!(coord.phase(*member).await, SessionPhase::RoomAssigned(room.room));
            }
        }
        assert_eq!(seen.len(), live.len());
        assert_eq!(coord.connection_count().await, live.len());
    }
}
