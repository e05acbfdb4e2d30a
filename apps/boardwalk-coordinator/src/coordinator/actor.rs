use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use boardwalk_core::backoff;
use boardwalk_core::{
    ClientBody, ClientControl, ClientEnvelope, ErrorCode, Mutation, PlayerId, PlayerInfo,
    ServerEnvelope, SessionContent, SessionId, SessionState, SERVER_PLAYER_ID,
};
use metrics::{counter, gauge, histogram};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{players, DisconnectReason, OutboundFrame, Phase, RegistryInner, SessionDebug};
use crate::error::CoordinatorError;
use crate::store::{Origin, StoredSession};

type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

pub(crate) enum Command {
    Connect {
        connection_id: String,
        outbound: mpsc::Sender<OutboundFrame>,
        reply: oneshot::Sender<ConnectReply>,
    },
    Frame {
        connection_id: String,
        text: String,
    },
    Disconnect {
        connection_id: String,
        reason: DisconnectReason,
    },
    Overwrite {
        content: SessionContent,
        reply: Reply<SessionState>,
    },
    Inspect {
        reply: Reply<SessionDebug>,
    },
    /// Backup write without retiring. Replies whether anything was written.
    Flush {
        reply: Reply<bool>,
    },
}

pub(crate) enum ConnectReply {
    Joined(PlayerInfo),
    /// The actor is shutting down; route to its successor.
    Retired,
    /// Neither store could be read.
    Unavailable,
}

struct Connection {
    player: PlayerInfo,
    outbound: mpsc::Sender<OutboundFrame>,
}

pub(crate) struct SessionActor {
    registry: Arc<RegistryInner>,
    session_id: SessionId,
    generation: u64,
    state: SessionState,
    connections: HashMap<String, Connection>,
    connection_count: Arc<AtomicUsize>,
    players_seen: HashSet<PlayerId>,
    unflushed: bool,
    inbox: mpsc::Receiver<Command>,
}

impl SessionActor {
    pub(crate) fn new(
        registry: Arc<RegistryInner>,
        session_id: SessionId,
        generation: u64,
        connection_count: Arc<AtomicUsize>,
        inbox: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            registry,
            session_id,
            generation,
            state: SessionState::default(),
            connections: HashMap::new(),
            connection_count,
            players_seen: HashSet::new(),
            unflushed: false,
            inbox,
        }
    }

    pub(crate) async fn run(mut self) {
        if let Err(err) = self.hydrate().await {
            error!(
                session_id = %self.session_id,
                error = %err,
                "session unavailable: could not hydrate"
            );
            counter!("boardwalk_hydrate_failures_total", 1);
            self.leave_registry();
            self.drain(true).await;
            return;
        }

        while let Some(command) = self.inbox.recv().await {
            self.handle(command).await;
            if self.connections.is_empty() {
                break;
            }
        }

        self.retire().await;
    }

    /// Fast store, then backup store, then a fresh default written straight
    /// to the fast store.
    async fn hydrate(&mut self) -> Result<(), CoordinatorError> {
        let stores = self.registry.stores.clone();
        let origin = match stores.load_latest(&self.session_id).await? {
            Some((record, Origin::Fast)) => {
                self.state = record.state;
                self.unflushed = match stores.backup.load(&self.session_id).await {
                    Ok(Some(backup)) => backup.state.version != self.state.version,
                    Ok(None) => true,
                    Err(err) => {
                        debug!(session_id = %self.session_id, error = %err, "backup peek failed");
                        true
                    }
                };
                Origin::Fast
            }
            Some((record, Origin::Backup)) => {
                self.state = record.state;
                let restored = StoredSession::new(self.state.clone());
                if let Err(err) = stores.fast.save(&self.session_id, &restored).await {
                    warn!(
                        session_id = %self.session_id,
                        error = %err,
                        "could not restore backup copy into fast store"
                    );
                }
                Origin::Backup
            }
            Some((_, Origin::Fresh)) | None => {
                self.state = SessionState::default();
                let record = StoredSession::new(self.state.clone());
                stores.fast.save(&self.session_id, &record).await?;
                self.unflushed = true;
                Origin::Fresh
            }
        };
        counter!("boardwalk_sessions_hydrated_total", 1, "origin" => origin.as_str());
        info!(
            session_id = %self.session_id,
            generation = self.generation,
            origin = origin.as_str(),
            version = self.state.version,
            "session hydrated"
        );
        Ok(())
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                connection_id,
                outbound,
                reply,
            } => {
                let joined = self.add_connection(connection_id, outbound);
                let _ = reply.send(match joined {
                    Some(player) => ConnectReply::Joined(player),
                    None => ConnectReply::Retired,
                });
            }
            Command::Frame {
                connection_id,
                text,
            } => self.handle_frame(&connection_id, &text).await,
            Command::Disconnect {
                connection_id,
                reason,
            } => self.remove_connections(vec![(connection_id, reason)]),
            Command::Overwrite { content, reply } => {
                let _ = reply.send(self.overwrite(content).await);
            }
            Command::Inspect { reply } => {
                let _ = reply.send(Ok(self.inspect()));
            }
            Command::Flush { reply } => {
                let _ = reply.send(Ok(self.flush_backup().await));
            }
        }
    }

    fn add_connection(
        &mut self,
        connection_id: String,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Option<PlayerInfo> {
        let player = players::generate(&mut rand::thread_rng());
        let mut roster: Vec<PlayerInfo> =
            self.connections.values().map(|c| c.player.clone()).collect();
        roster.push(player.clone());

        let snapshot =
            ServerEnvelope::snapshot(self.state.clone(), roster, Some(player.id.clone()));
        let frame = encode(&snapshot)?;
        if outbound.try_send(frame).is_err() {
            // the socket went away before it could be registered
            return None;
        }

        info!(
            session_id = %self.session_id,
            connection_id = %connection_id,
            player_id = %player.id,
            player_name = %player.name,
            "connection joined session"
        );
        self.players_seen.insert(player.id.clone());
        self.connections.insert(
            connection_id.clone(),
            Connection {
                player: player.clone(),
                outbound,
            },
        );
        self.update_connection_gauges();
        counter!("boardwalk_connections_total", 1);

        let joined = ServerEnvelope::player_joined(player.clone(), self.state.version);
        let failed = self.broadcast(&joined, Some(&connection_id));
        self.remove_connections(failed);
        Some(player)
    }

    /// Removes connections and tells the remaining ones. Removing one
    /// connection can evict others whose queues are full, so this works
    /// through a queue until nothing is left to remove.
    fn remove_connections(&mut self, mut pending: Vec<(String, DisconnectReason)>) {
        while let Some((connection_id, reason)) = pending.pop() {
            let Some(connection) = self.connections.remove(&connection_id) else {
                continue;
            };
            let player = connection.player;
            info!(
                session_id = %self.session_id,
                connection_id = %connection_id,
                player_id = %player.id,
                reason = reason.as_str(),
                remaining = self.connections.len(),
                "connection left session"
            );
            counter!("boardwalk_disconnects_total", 1, "reason" => reason.as_str());
            self.update_connection_gauges();

            let left = ServerEnvelope::player_left(player, self.state.version);
            pending.extend(self.broadcast(&left, None));
        }
    }

    fn update_connection_gauges(&self) {
        self.connection_count
            .store(self.connections.len(), Ordering::Relaxed);
        gauge!(
            "boardwalk_connections_active",
            self.connections.len() as f64,
            "session_id" => self.session_id.clone()
        );
    }

    async fn handle_frame(&mut self, connection_id: &str, text: &str) {
        let Some(player_id) = self
            .connections
            .get(connection_id)
            .map(|c| c.player.id.clone())
        else {
            debug!(session_id = %self.session_id, connection_id, "frame from unknown connection");
            return;
        };

        let envelope = match ClientEnvelope::decode(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                counter!("boardwalk_malformed_messages_total", 1);
                debug!(
                    session_id = %self.session_id,
                    connection_id,
                    error = %err,
                    "malformed client message"
                );
                let reply =
                    ServerEnvelope::error(ErrorCode::MalformedMessage, err.reason, err.type_name);
                self.send_to(connection_id, &reply);
                return;
            }
        };

        match envelope.body {
            ClientBody::Mutation(mutation) => {
                self.apply_mutation(connection_id, player_id, mutation).await
            }
            ClientBody::Control(ClientControl::RequestSnapshot) => {
                let snapshot = ServerEnvelope::snapshot(
                    self.state.clone(),
                    self.roster(),
                    Some(player_id),
                );
                self.send_to(connection_id, &snapshot);
            }
            ClientBody::Control(ClientControl::Ping) => {
                self.send_to(connection_id, &ServerEnvelope::pong());
            }
        }
    }

    /// Validate on a copy, persist to the fast store, then commit and
    /// broadcast. Nothing is broadcast unless the fast-store write succeeded.
    async fn apply_mutation(
        &mut self,
        connection_id: &str,
        player_id: PlayerId,
        mutation: Mutation,
    ) {
        let started = Instant::now();
        let kind = mutation.kind();
        let mut next = self.state.clone();
        let change = match mutation.apply(&mut next) {
            Ok(change) => change,
            Err(err) => {
                counter!(
                    "boardwalk_mutations_rejected_total",
                    1,
                    "type" => kind.wire_name(),
                    "reason" => err.code()
                );
                debug!(
                    session_id = %self.session_id,
                    connection_id,
                    mutation = kind.wire_name(),
                    error = %err,
                    "mutation rejected"
                );
                let reply = ServerEnvelope::error(
                    ErrorCode::ValidationFailed,
                    err.to_string(),
                    Some(kind.wire_name().to_string()),
                );
                self.send_to(connection_id, &reply);
                return;
            }
        };

        let record = StoredSession::new(next.clone());
        if let Err(err) = self.registry.stores.fast.save(&self.session_id, &record).await {
            counter!(
                "boardwalk_persistence_failures_total",
                1,
                "store" => self.registry.stores.fast.name()
            );
            warn!(
                session_id = %self.session_id,
                mutation = kind.wire_name(),
                error = %err,
                "fast store write failed; mutation dropped"
            );
            let reply = ServerEnvelope::error(
                ErrorCode::PersistenceFailed,
                format!("could not persist {}: {err}", kind.wire_name()),
                Some(kind.wire_name().to_string()),
            );
            self.send_to(connection_id, &reply);
            return;
        }

        self.state = next;
        self.unflushed = true;
        let envelope = ServerEnvelope::change(change, Some(player_id), self.state.version);
        let failed = self.broadcast(&envelope, None);
        self.remove_connections(failed);

        counter!("boardwalk_mutations_applied_total", 1, "type" => kind.wire_name());
        histogram!(
            "boardwalk_mutation_apply_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            "type" => kind.wire_name()
        );
    }

    async fn overwrite(
        &mut self,
        content: SessionContent,
    ) -> Result<SessionState, CoordinatorError> {
        let mut next = self.state.clone();
        next.overwrite_content(content);
        next.version += 1;
        next.validate()?;
        self.registry
            .stores
            .fast
            .save(&self.session_id, &StoredSession::new(next.clone()))
            .await?;
        self.state = next;
        self.unflushed = true;
        info!(
            session_id = %self.session_id,
            version = self.state.version,
            "session overwritten over http"
        );

        let mut failed = Vec::new();
        let targets: Vec<(String, PlayerId)> = self
            .connections
            .iter()
            .map(|(id, c)| (id.clone(), c.player.id.clone()))
            .collect();
        let roster = self.roster();
        for (connection_id, player_id) in targets {
            let snapshot =
                ServerEnvelope::snapshot(self.state.clone(), roster.clone(), Some(player_id))
                    .attributed_to(SERVER_PLAYER_ID);
            if !self.send_to(&connection_id, &snapshot) {
                failed.push((connection_id, DisconnectReason::SlowConsumer));
            }
        }
        self.remove_connections(failed);
        Ok(self.state.clone())
    }

    fn inspect(&self) -> SessionDebug {
        SessionDebug {
            session_id: self.session_id.clone(),
            phase: if self.connections.is_empty() {
                Phase::Empty
            } else {
                Phase::Active
            },
            connection_count: self.connections.len(),
            unique_players_seen: self.players_seen.len(),
            unflushed_to_backup: self.unflushed,
            version: self.state.version,
        }
    }

    fn roster(&self) -> Vec<PlayerInfo> {
        let mut players: Vec<PlayerInfo> =
            self.connections.values().map(|c| c.player.clone()).collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players
    }

    /// Queues `envelope` for one connection. Returns false if the
    /// connection's queue is full or closed.
    fn send_to(&self, connection_id: &str, envelope: &ServerEnvelope) -> bool {
        let Some(connection) = self.connections.get(connection_id) else {
            return false;
        };
        let Some(frame) = encode(envelope) else {
            return false;
        };
        connection.outbound.try_send(frame).is_ok()
    }

    /// Queues `envelope` for every connection except `skip`. Connections that
    /// cannot take it are returned for eviction; a client that silently
    /// missed a change would otherwise stay diverged until its next snapshot.
    fn broadcast(
        &self,
        envelope: &ServerEnvelope,
        skip: Option<&str>,
    ) -> Vec<(String, DisconnectReason)> {
        let Some(frame) = encode(envelope) else {
            return Vec::new();
        };
        let mut failed = Vec::new();
        for (connection_id, connection) in &self.connections {
            if skip == Some(connection_id.as_str()) {
                continue;
            }
            match connection.outbound.try_send(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counter!("boardwalk_slow_consumer_evictions_total", 1);
                    warn!(
                        session_id = %self.session_id,
                        connection_id = %connection_id,
                        "outbound queue full; evicting connection"
                    );
                    failed.push((connection_id.clone(), DisconnectReason::SlowConsumer));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    failed.push((connection_id.clone(), DisconnectReason::TransportError));
                }
            }
        }
        failed
    }

    /// Writes the in-memory state to the backup store with bounded retry.
    /// Returns whether a write happened.
    async fn flush_backup(&mut self) -> bool {
        if !self.unflushed {
            return false;
        }
        let backup = Arc::clone(&self.registry.stores.backup);
        let record = StoredSession::new(self.state.clone());
        let session_id = self.session_id.clone();
        let result = backoff::retry(&self.registry.config.backup_retry, |attempt| {
            let backup = Arc::clone(&backup);
            let record = record.clone();
            let session_id = session_id.clone();
            async move {
                if attempt > 0 {
                    debug!(session_id = %session_id, attempt, "retrying backup flush");
                }
                backup.save_if_newer(&session_id, &record).await
            }
        })
        .await;

        match result {
            Ok(false) => {
                // a successor already flushed a later version
                self.unflushed = false;
                counter!("boardwalk_backup_flushes_total", 1, "outcome" => "superseded");
                info!(
                    session_id = %self.session_id,
                    version = self.state.version,
                    "backup store already holds a newer version; flush skipped"
                );
                false
            }
            Ok(true) => {
                self.unflushed = false;
                counter!("boardwalk_backup_flushes_total", 1, "outcome" => "ok");
                info!(
                    session_id = %self.session_id,
                    version = self.state.version,
                    "flushed session to backup store"
                );
                true
            }
            Err(err) => {
                counter!("boardwalk_backup_flushes_total", 1, "outcome" => "failed");
                error!(
                    session_id = %self.session_id,
                    version = self.state.version,
                    error = %err,
                    "backup flush failed after retries; fast store still holds the session"
                );
                false
            }
        }
    }

    fn leave_registry(&self) {
        self.registry.forget(&self.session_id, self.generation);
    }

    /// Answers whatever is still queued. Connects are told to retry so they
    /// land on a fresh actor.
    async fn drain(&mut self, unavailable: bool) {
        self.inbox.close();
        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Connect { reply, .. } => {
                    let _ = reply.send(if unavailable {
                        ConnectReply::Unavailable
                    } else {
                        ConnectReply::Retired
                    });
                }
                Command::Overwrite { reply, .. } => {
                    let _ = reply.send(Err(if unavailable {
                        CoordinatorError::Unavailable(self.session_id.clone())
                    } else {
                        CoordinatorError::Retired
                    }));
                }
                Command::Inspect { reply } => {
                    let _ = reply.send(Err(CoordinatorError::Retired));
                }
                Command::Flush { reply } => {
                    let _ = reply.send(Ok(false));
                }
                Command::Frame { .. } | Command::Disconnect { .. } => {}
            }
        }
    }

    /// Leave the registry first so new connections spawn a successor that
    /// hydrates from the fast store, then flush.
    async fn retire(mut self) {
        self.leave_registry();
        self.drain(false).await;
        self.flush_backup().await;
        debug!(
            session_id = %self.session_id,
            generation = self.generation,
            "session actor retired"
        );
    }
}

fn encode(envelope: &ServerEnvelope) -> Option<OutboundFrame> {
    match serde_json::to_string(envelope) {
        Ok(text) => Some(Arc::from(text)),
        Err(err) => {
            error!(kind = envelope.type_name(), error = %err, "failed to encode server frame");
            None
        }
    }
}
