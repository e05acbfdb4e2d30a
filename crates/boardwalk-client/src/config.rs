use std::time::Duration;

use boardwalk_core::ReconnectPolicy;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session WebSocket endpoint, `ws://host/ws/<session_id>`.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Mutations held while offline before `send` starts failing.
    pub outbox_capacity: usize,
    /// Interval between `ping` frames; keeps the coordinator's idle window open.
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}
