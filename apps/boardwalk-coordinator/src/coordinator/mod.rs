//! Session coordinator.
//!
//! Each live session is one tokio task ([`actor`]) that owns the session state
//! and drains a bounded mailbox, so every mutation for a session is applied
//! one at a time in arrival order. [`SessionRegistry`] maps session ids to
//! those tasks and spawns a fresh one on first access. An actor removes
//! itself from the registry as soon as its last connection leaves, before it
//! flushes the backup store, so a reconnect always reaches a live actor.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use boardwalk_core::{BackoffConfig, PlayerInfo, SessionContent, SessionId, SessionState};
use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::future::join_all;
use metrics::gauge;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoordinatorError;
use crate::store::{StoredSession, Stores};

mod actor;
pub mod players;

use actor::{Command, ConnectReply, SessionActor};

/// A serialized frame queued for one connection's writer.
pub type OutboundFrame = Arc<str>;

/// How many times a request follows a retiring actor to its successor.
const MAX_ROUTE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Outbound frames buffered per connection before it counts as slow.
    pub connection_buffer: usize,
    /// Commands buffered per session actor.
    pub mailbox_depth: usize,
    /// Retry schedule for backup flushes.
    pub backup_retry: BackoffConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connection_buffer: 256,
            mailbox_depth: 1024,
            backup_retry: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    IdleTimeout,
    TransportError,
    SlowConsumer,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::SlowConsumer => "slow_consumer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// An actor is live but holds no connections.
    Empty,
    Active,
    /// No actor; the session only exists in the stores.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDebug {
    pub session_id: SessionId,
    pub phase: Phase,
    pub connection_count: usize,
    pub unique_players_seen: usize,
    pub unflushed_to_backup: bool,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub connections: usize,
}

/// Mailbox of one live actor.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    generation: u64,
    tx: mpsc::Sender<Command>,
    connections: Arc<AtomicUsize>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Hands one inbound text frame to the actor.
    pub async fn frame(&self, connection_id: &str, text: String) -> Result<(), CoordinatorError> {
        self.tx
            .send(Command::Frame {
                connection_id: connection_id.to_string(),
                text,
            })
            .await
            .map_err(|_| CoordinatorError::Unavailable(self.session_id.clone()))
    }

    pub async fn disconnect(&self, connection_id: &str, reason: DisconnectReason) {
        let command = Command::Disconnect {
            connection_id: connection_id.to_string(),
            reason,
        };
        if self.tx.send(command).await.is_err() {
            debug!(
                session_id = %self.session_id,
                connection_id,
                "actor already gone at disconnect"
            );
        }
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    sessions: DashMap<SessionId, SessionHandle>,
    stores: Stores,
    config: CoordinatorConfig,
    next_generation: AtomicU64,
}

impl RegistryInner {
    /// Drops the registry entry only if it still points at `generation`.
    fn forget(&self, session_id: &str, generation: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, handle| handle.generation == generation)
            .is_some();
        if removed {
            gauge!("boardwalk_sessions_active", self.sessions.len() as f64);
        }
        removed
    }
}

impl SessionRegistry {
    pub fn new(stores: Stores, config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                stores,
                config,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    fn live(&self, session_id: &str) -> Option<SessionHandle> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    /// Returns the live actor for `session_id`, spawning one if needed.
    fn handle_for(&self, session_id: &str) -> SessionHandle {
        let (handle, actor) = match self.inner.sessions.entry(session_id.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), None),
            Entry::Vacant(entry) => {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::channel(self.inner.config.mailbox_depth);
                let handle = SessionHandle {
                    session_id: session_id.to_string(),
                    generation,
                    tx,
                    connections: Arc::new(AtomicUsize::new(0)),
                };
                entry.insert(handle.clone());
                let actor = SessionActor::new(
                    Arc::clone(&self.inner),
                    handle.session_id.clone(),
                    generation,
                    Arc::clone(&handle.connections),
                    rx,
                );
                (handle, Some(actor))
            }
        };
        // spawn outside the shard lock; the actor may remove itself at once
        if let Some(actor) = actor {
            tokio::spawn(actor.run());
            gauge!("boardwalk_sessions_active", self.inner.sessions.len() as f64);
        }
        handle
    }

    /// Registers a connection, hydrating the session if no actor is live.
    ///
    /// The actor queues the initial snapshot on `outbound` before this
    /// returns. The actor holds the only sender afterwards; the channel
    /// closes when the connection is removed.
    pub async fn connect(
        &self,
        session_id: &str,
        connection_id: &str,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<(SessionHandle, PlayerInfo), CoordinatorError> {
        for _ in 0..MAX_ROUTE_ATTEMPTS {
            let handle = self.handle_for(session_id);
            let (reply, response) = oneshot::channel();
            let command = Command::Connect {
                connection_id: connection_id.to_string(),
                outbound: outbound.clone(),
                reply,
            };
            if handle.tx.send(command).await.is_err() {
                self.inner.forget(session_id, handle.generation);
                continue;
            }
            match response.await {
                Ok(ConnectReply::Joined(player)) => return Ok((handle, player)),
                Ok(ConnectReply::Unavailable) => {
                    return Err(CoordinatorError::Unavailable(session_id.to_string()))
                }
                Ok(ConnectReply::Retired) | Err(_) => {
                    self.inner.forget(session_id, handle.generation);
                }
            }
        }
        warn!(session_id, "gave up routing connection to a session actor");
        Err(CoordinatorError::Unavailable(session_id.to_string()))
    }

    async fn request<T>(
        handle: &SessionHandle,
        make: impl FnOnce(oneshot::Sender<Result<T, CoordinatorError>>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        handle
            .tx
            .send(make(reply))
            .await
            .map_err(|_| CoordinatorError::Retired)?;
        response.await.map_err(|_| CoordinatorError::Retired)?
    }

    /// Stores a brand-new session and returns its id.
    pub async fn create(
        &self,
        content: SessionContent,
    ) -> Result<(SessionId, SessionState), CoordinatorError> {
        let state = content.into_state();
        state.validate()?;
        let session_id = Uuid::new_v4().to_string();
        let record = StoredSession::new(state.clone());
        self.inner.stores.fast.save(&session_id, &record).await?;
        if let Err(err) = self.inner.stores.backup.save(&session_id, &record).await {
            warn!(session_id = %session_id, error = %err, "backup write for new session failed");
        }
        Ok((session_id, state))
    }

    /// Current stored record. The fast store is written before every
    /// broadcast, so it is never behind a live actor.
    pub async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, CoordinatorError> {
        Ok(self
            .inner
            .stores
            .load_latest(session_id)
            .await?
            .map(|(record, _)| record))
    }

    /// Replaces tracks/tempo/swing of an existing session through its actor.
    pub async fn overwrite(
        &self,
        session_id: &str,
        content: SessionContent,
    ) -> Result<SessionState, CoordinatorError> {
        content.clone().into_state().validate()?;
        for _ in 0..MAX_ROUTE_ATTEMPTS {
            let handle = match self.live(session_id) {
                Some(handle) => handle,
                None => {
                    if self.load(session_id).await?.is_none() {
                        return Err(CoordinatorError::NotFound(session_id.to_string()));
                    }
                    self.handle_for(session_id)
                }
            };
            let content = content.clone();
            match Self::request(&handle, |reply| Command::Overwrite { content, reply }).await {
                Err(CoordinatorError::Retired) => {
                    self.inner.forget(session_id, handle.generation);
                }
                other => return other,
            }
        }
        Err(CoordinatorError::Unavailable(session_id.to_string()))
    }

    /// Live view if an actor is running, stored view otherwise.
    pub async fn debug(&self, session_id: &str) -> Result<SessionDebug, CoordinatorError> {
        if let Some(handle) = self.live(session_id) {
            match Self::request(&handle, |reply| Command::Inspect { reply }).await {
                Ok(debug) => return Ok(debug),
                Err(CoordinatorError::Retired) => {}
                Err(err) => return Err(err),
            }
        }
        match self.load(session_id).await? {
            Some(record) => Ok(SessionDebug {
                session_id: session_id.to_string(),
                phase: Phase::Idle,
                connection_count: 0,
                unique_players_seen: 0,
                unflushed_to_backup: false,
                version: record.state.version,
            }),
            None => Err(CoordinatorError::NotFound(session_id.to_string())),
        }
    }

    pub fn stats(&self) -> Vec<SessionStats> {
        let mut stats: Vec<SessionStats> = self
            .inner
            .sessions
            .iter()
            .map(|entry| SessionStats {
                session_id: entry.key().clone(),
                connections: entry.value().connection_count(),
            })
            .collect();
        stats.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        stats
    }

    /// Asks every live actor to write its state to the backup store. Used on
    /// shutdown, when connections may never send their close frames.
    pub async fn flush_all(&self) -> usize {
        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let flushes = handles
            .iter()
            .map(|handle| Self::request(handle, |reply| Command::Flush { reply }));
        join_all(flushes)
            .await
            .into_iter()
            .filter(|result| matches!(result, Ok(true)))
            .count()
    }
}
