#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use boardwalk_coordinator::coordinator::{CoordinatorConfig, SessionRegistry};
use boardwalk_coordinator::store::{MemoryStore, Stores};
use boardwalk_coordinator::{router, AppState};
use boardwalk_core::BackoffConfig;
use futures_util::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestApp {
    pub state: Arc<AppState>,
    pub fast: Arc<MemoryStore>,
    pub backup: Arc<MemoryStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_idle_timeout(Duration::from_secs(30))
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        let fast = Arc::new(MemoryStore::named("fast"));
        let backup = Arc::new(MemoryStore::named("backup"));
        let config = CoordinatorConfig {
            connection_buffer: 64,
            mailbox_depth: 64,
            backup_retry: BackoffConfig {
                base: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                jitter: 0.0,
                max_attempts: 3,
            },
        };
        let registry = SessionRegistry::new(Stores::new(fast.clone(), backup.clone()), config);
        // a recorder that is never installed globally
        let metrics = PrometheusBuilder::new().build_recorder().handle();
        let state = Arc::new(AppState::new(registry, idle_timeout, metrics));
        Self {
            state,
            fast,
            backup,
        }
    }

    pub fn router(&self) -> axum::Router {
        router(Arc::clone(&self.state))
    }

    /// Serves the router on an ephemeral port.
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        addr
    }
}

pub async fn connect(addr: SocketAddr, session_id: &str) -> Ws {
    let url = format!("ws://{addr}/ws/{session_id}");
    let (ws, _) = connect_async(url.as_str()).await.expect("ws connect");
    ws
}

pub async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Next text frame as JSON. Panics if the socket closes or stays quiet.
pub async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("frame ok");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json frame"),
            Message::Close(frame) => panic!("socket closed: {frame:?}"),
            _ => {}
        }
    }
}

/// Skips frames until one with the given `type` arrives.
pub async fn next_of_type(ws: &mut Ws, kind: &str) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// Next frame that is not roster traffic.
pub async fn next_session_frame(ws: &mut Ws) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["type"] != "player_joined" && frame["type"] != "player_left" {
            return frame;
        }
    }
}

/// Polls `check` every 10ms for up to five seconds.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}
