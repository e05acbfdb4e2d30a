use std::time::Duration;

use boardwalk_client::{ClientConfig, ConnectionStatus, SyncClient, SyncEvent};
use boardwalk_core::{
    BackoffConfig, ClientBody, ClientControl, ClientEnvelope, Mutation, ReconnectPolicy,
    ServerEnvelope, SessionState,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerSocket = WebSocketStream<TcpStream>;

fn quick_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        backoff: BackoffConfig {
            base: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: 0.0,
            max_attempts,
        },
    }
}

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    (listener, format!("ws://{addr}/ws/jam"))
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.expect("accept");
    accept_async(stream).await.expect("handshake")
}

async fn send_snapshot(socket: &mut ServerSocket, version: u64) {
    let state = SessionState {
        version,
        ..SessionState::default()
    };
    let frame = ServerEnvelope::snapshot(state, Vec::new(), Some("p1".into()));
    let text = serde_json::to_string(&frame).expect("encode");
    socket.send(Message::Text(text.into())).await.expect("send");
}

/// Next client frame that is not a heartbeat.
async fn next_request(socket: &mut ServerSocket) -> ClientEnvelope {
    loop {
        let message = socket
            .next()
            .await
            .expect("client frame")
            .expect("client frame ok");
        if let Message::Text(text) = message {
            let envelope = ClientEnvelope::decode(text.as_str()).expect("decode");
            if envelope.body != ClientBody::Control(ClientControl::Ping) {
                return envelope;
            }
        }
    }
}

async fn wait_for<F>(events: &mut UnboundedReceiver<SyncEvent>, mut matches: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("event stream open");
        if matches(&event) {
            return event;
        }
    }
}

#[test_timeout::tokio_timeout_test(30)]
async fn mutations_reach_the_server_after_the_snapshot() {
    let (listener, url) = listen().await;
    let mut config = ClientConfig::new(url);
    config.reconnect = quick_policy(3);
    let (client, mut events) = SyncClient::connect(config).await.expect("connect");

    let mut server = accept(&listener).await;
    send_snapshot(&mut server, 4).await;
    wait_for(&mut events, |e| matches!(e, SyncEvent::Snapshot { version: 4, .. })).await;
    assert_eq!(client.player_id().as_deref(), Some("p1"));

    client
        .send(Mutation::SetTempo { tempo: 132 })
        .expect("queue mutation");
    assert_eq!(client.state().tempo, 132, "applied optimistically");

    let sent = next_request(&mut server).await;
    assert_eq!(
        sent.body,
        ClientBody::Mutation(Mutation::SetTempo { tempo: 132 })
    );
    client.close().await;
}

#[test_timeout::tokio_timeout_test(30)]
async fn dropped_connection_reconnects_and_requests_a_snapshot() {
    let (listener, url) = listen().await;
    let mut config = ClientConfig::new(url);
    config.reconnect = quick_policy(5);
    let (client, mut events) = SyncClient::connect(config).await.expect("connect");

    let mut first = accept(&listener).await;
    send_snapshot(&mut first, 2).await;
    wait_for(&mut events, |e| matches!(e, SyncEvent::Snapshot { .. })).await;
    drop(first);

    wait_for(&mut events, |e| {
        matches!(
            e,
            SyncEvent::StatusChanged {
                status: ConnectionStatus::Reconnecting { attempt: 1 }
            }
        )
    })
    .await;

    let mut second = accept(&listener).await;
    let greeting = next_request(&mut second).await;
    assert_eq!(
        greeting.body,
        ClientBody::Control(ClientControl::RequestSnapshot)
    );
    send_snapshot(&mut second, 3).await;
    wait_for(&mut events, |e| matches!(e, SyncEvent::Snapshot { version: 3, .. })).await;

    assert_eq!(client.connection_opens(), 2);
    assert_eq!(client.status(), ConnectionStatus::Connected);
    client.close().await;
}

#[test_timeout::tokio_timeout_test(30)]
async fn unreachable_server_exhausts_reconnect_attempts() {
    let (listener, url) = listen().await;
    let mut config = ClientConfig::new(url);
    config.reconnect = quick_policy(2);
    config.connect_timeout = Duration::from_millis(500);
    let (client, mut events) = SyncClient::connect(config).await.expect("connect");

    let first = accept(&listener).await;
    drop(first);
    drop(listener);

    let gave_up = wait_for(&mut events, |e| matches!(e, SyncEvent::GaveUp { .. })).await;
    assert_eq!(gave_up, SyncEvent::GaveUp { attempts: 2 });
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(client.connection_opens(), 1);
    assert!(client.send(Mutation::SetSwing { swing: 10 }).is_err());
    client.close().await;
}

#[test_timeout::tokio_timeout_test(30)]
async fn stale_snapshot_is_reported_and_ignored() {
    let (listener, url) = listen().await;
    let (client, mut events) = SyncClient::connect(ClientConfig::new(url))
        .await
        .expect("connect");
    let mut server = accept(&listener).await;

    let mut fresh = ServerEnvelope::snapshot(
        SessionState {
            version: 9,
            ..SessionState::default()
        },
        Vec::new(),
        Some("p1".into()),
    );
    fresh.timestamp = 5_000;
    let mut stale = ServerEnvelope::snapshot(SessionState::default(), Vec::new(), None);
    stale.timestamp = 4_000;
    for frame in [fresh, stale] {
        let text = serde_json::to_string(&frame).expect("encode");
        server.send(Message::Text(text.into())).await.expect("send");
    }

    let rejected = wait_for(&mut events, |e| {
        matches!(e, SyncEvent::SnapshotRejected { .. })
    })
    .await;
    assert_eq!(
        rejected,
        SyncEvent::SnapshotRejected {
            timestamp: 4_000,
            last_applied: 5_000
        }
    );
    assert_eq!(client.state().version, 9);
    client.close().await;
}
