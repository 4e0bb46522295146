use std::net::SocketAddr;
use std::time::Duration;

use beach_pier::{config::RelayConfig, serve, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(3);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

struct Relay {
    addr: SocketAddr,
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Relay {
    async fn start(relay: RelayConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(relay, None);
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(serve(listener, state.clone(), async move {
            let _ = rx.await;
        }));
        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    /// Connects and waits until the relay has registered this connection.
    async fn join(&self, room: &str, user: &str) -> Client {
        let previous = self.occupant(room, user);
        let (client, _) = connect_async(format!("ws://{}/{}/{}", self.addr, room, user))
            .await
            .unwrap();
        self.wait_until(|relay| {
            let current = relay.occupant(room, user);
            current.is_some() && current != previous
        })
        .await;
        client
    }

    fn occupant(&self, room: &str, user: &str) -> Option<Uuid> {
        self.state.registry.lookup(room, user).map(|conn| conn.id())
    }

    async fn wait_until(&self, condition: impl Fn(&Relay) -> bool) {
        let deadline = Instant::now() + RECV_TIMEOUT;
        while !condition(self) {
            assert!(Instant::now() < deadline, "relay state never converged");
            sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON envelope, skipping transport-level ping/pong frames.
async fn next_event(client: &mut Client) -> Value {
    timeout(RECV_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).unwrap()
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    })
        .await
        .expect("timed out waiting for an event")
}

async fn expect_silence(client: &mut Client) {
    let result = timeout(QUIET_PERIOD, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    if let Ok(frame) = result {
        panic!("expected no traffic, got {frame:?}");
    }
}

async fn expect_close(client: &mut Client, code: CloseCode) {
    let frame = timeout(RECV_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for close");
    assert_eq!(frame.map(|f| f.code), Some(code));
}

fn new_participant(user: &str) -> Value {
    json!({ "event": "newParticipant", "data": { "userId": user } })
}

#[tokio::test]
async fn existing_peers_are_told_about_newcomer() {
    let relay = Relay::start(RelayConfig::default()).await;
    let mut alice = relay.join("lobby", "alice").await;
    let mut carol = relay.join("lobby", "carol").await;
    assert_eq!(next_event(&mut alice).await, new_participant("carol"));
    let mut dave = relay.join("attic", "dave").await;

    let mut bob = relay.join("lobby", "bob").await;

    assert_eq!(next_event(&mut alice).await, new_participant("bob"));
    assert_eq!(next_event(&mut carol).await, new_participant("bob"));
    expect_silence(&mut alice).await;
    expect_silence(&mut carol).await;
    expect_silence(&mut bob).await;
    expect_silence(&mut dave).await;
}

#[tokio::test]
async fn offer_and_answer_reach_the_addressed_peer() {
    let relay = Relay::start(RelayConfig::default()).await;
    let mut alice = relay.join("lobby", "alice").await;
    let mut bob = relay.join("lobby", "bob").await;
    assert_eq!(next_event(&mut alice).await, new_participant("bob"));

    let sdp = json!({ "type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1" });
    send(
        &mut alice,
        json!({ "event": "offer", "data": { "userId": "bob", "payload": sdp } }),
    )
    .await;
    assert_eq!(
        next_event(&mut bob).await,
        json!({ "event": "offer", "data": { "userId": "alice", "payload": sdp } })
    );

    send(
        &mut bob,
        json!({ "event": "answer", "data": { "userId": "alice", "payload": "answer-sdp" } }),
    )
    .await;
    assert_eq!(
        next_event(&mut alice).await,
        json!({ "event": "answer", "data": { "userId": "bob", "payload": "answer-sdp" } })
    );
    expect_silence(&mut alice).await;
    expect_silence(&mut bob).await;
}

#[tokio::test]
async fn offers_to_absent_users_are_dropped_silently() {
    let relay = Relay::start(RelayConfig::default()).await;
    let mut alice = relay.join("lobby", "alice").await;
    let mut attic_bob = relay.join("attic", "bob").await;

    send(
        &mut alice,
        json!({ "event": "offer", "data": { "userId": "bob", "payload": 1 } }),
    )
    .await;
    send(
        &mut alice,
        json!({ "event": "offer", "data": { "userId": "ghost", "payload": 1 } }),
    )
    .await;

    expect_silence(&mut alice).await;
    expect_silence(&mut attic_bob).await;
    assert!(relay.occupant("lobby", "alice").is_some());
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_connection() {
    let relay = Relay::start(RelayConfig::default()).await;
    let mut alice = relay.join("lobby", "alice").await;
    let mut bob = relay.join("lobby", "bob").await;
    assert_eq!(next_event(&mut alice).await, new_participant("bob"));

    alice
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    send(&mut alice, json!({ "event": "offer" })).await;
    send(&mut alice, json!({ "event": "iceCandidate", "data": {} })).await;
    alice
        .send(Message::Binary(vec![0xff, 0xfe, 0x00].into()))
        .await
        .unwrap();
    send(
        &mut alice,
        json!({ "event": "answer", "data": { "userId": "bob", "payload": { "ok": true } } }),
    )
    .await;

    assert_eq!(
        next_event(&mut bob).await,
        json!({ "event": "answer", "data": { "userId": "alice", "payload": { "ok": true } } })
    );
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn rejoining_replaces_the_previous_connection() {
    let relay = Relay::start(RelayConfig::default()).await;
    let mut alice = relay.join("lobby", "alice").await;
    let mut first_bob = relay.join("lobby", "bob").await;
    assert_eq!(next_event(&mut alice).await, new_participant("bob"));

    let mut second_bob = relay.join("lobby", "bob").await;
    expect_close(&mut first_bob, CloseCode::Policy).await;
    assert_eq!(next_event(&mut alice).await, new_participant("bob"));
    assert_eq!(relay.state.registry.connection_count(), 2);

    send(
        &mut alice,
        json!({ "event": "offer", "data": { "userId": "bob", "payload": "p" } }),
    )
    .await;
    assert_eq!(
        next_event(&mut second_bob).await,
        json!({ "event": "offer", "data": { "userId": "alice", "payload": "p" } })
    );

    // The evicted socket's cleanup must not free the new occupant's slot.
    sleep(QUIET_PERIOD).await;
    assert!(relay.occupant("lobby", "bob").is_some());
}

#[tokio::test]
async fn disconnect_frees_the_slot() {
    let relay = Relay::start(RelayConfig::default()).await;
    let mut alice = relay.join("lobby", "alice").await;
    let bob = relay.join("lobby", "bob").await;
    assert_eq!(next_event(&mut alice).await, new_participant("bob"));

    drop(bob);
    relay
        .wait_until(|relay| relay.occupant("lobby", "bob").is_none())
        .await;

    alice.close(None).await.unwrap();
    relay
        .wait_until(|relay| relay.state.registry.room_count() == 0)
        .await;
}

#[tokio::test]
async fn idle_connections_receive_keepalive_pings() {
    let interval = Duration::from_millis(300);
    let relay = Relay::start(RelayConfig {
        keepalive_interval: interval,
        ..RelayConfig::default()
    })
    .await;
    let mut alice = relay.join("lobby", "alice").await;

    let window = interval * 3 + interval / 2;
    let deadline = Instant::now() + window;
    let mut pings = 0;
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, alice.next()).await {
        if let Message::Text(text) = frame.unwrap() {
            let event: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(event["event"], "ping");
            pings += 1;
        }
    }
    assert!((2..=4).contains(&pings), "saw {pings} pings");
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let mut relay = Relay::start(RelayConfig::default()).await;
    let mut alice = relay.join("lobby", "alice").await;
    let mut bob = relay.join("attic", "bob").await;

    relay.shutdown.take().unwrap().send(()).unwrap();

    expect_close(&mut alice, CloseCode::Away).await;
    expect_close(&mut bob, CloseCode::Away).await;
    relay
        .wait_until(|relay| relay.state.registry.connection_count() == 0)
        .await;
}
