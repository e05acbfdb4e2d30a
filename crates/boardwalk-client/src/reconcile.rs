use std::collections::VecDeque;
use std::time::Duration;

use boardwalk_core::{
    is_mutating_type, Change, ClientControl, ClientEnvelope, ErrorCode, PlayerId, PlayerInfo,
    ReconnectPolicy, ServerBody, ServerEnvelope, ServerEvent, SessionState,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::action::{Action, LocalState};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal: closed by the caller or out of reconnect attempts.
    Disconnected,
}

/// What the UI layer hears about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Snapshot {
        version: u64,
        timestamp: u64,
    },
    SnapshotRejected {
        timestamp: u64,
        last_applied: u64,
    },
    Changed {
        change: Change,
        player_id: Option<PlayerId>,
        version: Option<u64>,
    },
    PlayerJoined {
        player: PlayerInfo,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    ServerError {
        code: ErrorCode,
        message: String,
        rejected_type: Option<String>,
    },
    StatusChanged {
        status: ConnectionStatus,
    },
    GaveUp {
        attempts: u32,
    },
}

/// Result of feeding one server frame to [`SyncCore`].
#[derive(Debug, Default, PartialEq)]
pub struct ServerOutcome {
    pub events: Vec<SyncEvent>,
    /// The local copy may have diverged; ask for a fresh snapshot.
    pub request_snapshot: bool,
}

/// Reconciliation state for one client, free of I/O.
#[derive(Debug)]
pub struct SyncCore {
    state: SessionState,
    local: LocalState,
    players: Vec<PlayerInfo>,
    player_id: Option<PlayerId>,
    last_applied_snapshot_timestamp: u64,
    has_snapshot: bool,
    outbox: VecDeque<ClientEnvelope>,
    outbox_capacity: usize,
    status: ConnectionStatus,
    ever_connected: bool,
    reconnect_attempts: u32,
    policy: ReconnectPolicy,
}

impl SyncCore {
    pub fn new(policy: ReconnectPolicy, outbox_capacity: usize) -> Self {
        Self {
            state: SessionState::default(),
            local: LocalState::default(),
            players: Vec::new(),
            player_id: None,
            last_applied_snapshot_timestamp: 0,
            has_snapshot: false,
            outbox: VecDeque::with_capacity(outbox_capacity),
            outbox_capacity,
            status: ConnectionStatus::Connecting,
            ever_connected: false,
            reconnect_attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn local(&self) -> &LocalState {
        &self.local
    }

    pub fn players(&self) -> &[PlayerInfo] {
        &self.players
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_applied_snapshot_timestamp(&self) -> u64 {
        self.last_applied_snapshot_timestamp
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Local actions update [`LocalState`] only. Mutations are applied
    /// optimistically and queued; the coordinator's echo later overwrites
    /// the affected fields with authoritative values.
    pub fn send(&mut self, action: Action) -> Result<(), SyncError> {
        match action {
            Action::Local(action) => {
                self.local.apply(action);
                Ok(())
            }
            Action::Mutate(mutation) => {
                if self.status == ConnectionStatus::Disconnected {
                    return Err(SyncError::Closed);
                }
                if self.outbox.len() >= self.outbox_capacity {
                    return Err(SyncError::OutboxFull {
                        capacity: self.outbox_capacity,
                    });
                }
                mutation.apply_local(&mut self.state)?;
                self.outbox.push_back(ClientEnvelope::mutation(mutation));
                Ok(())
            }
        }
    }

    /// Drains queued mutations for transmission. Empty unless connected;
    /// drained messages count as sent and are never replayed.
    pub fn take_outbox(&mut self) -> Vec<ClientEnvelope> {
        if self.status != ConnectionStatus::Connected {
            return Vec::new();
        }
        self.outbox.drain(..).collect()
    }

    /// A transport is open. Returns the frames to send first: a snapshot
    /// request when this is a reconnect, then whatever queued up offline.
    pub fn on_connected(&mut self) -> Vec<ClientEnvelope> {
        let reconnect = self.ever_connected;
        self.ever_connected = true;
        self.reconnect_attempts = 0;
        self.status = ConnectionStatus::Connected;

        let mut frames = Vec::with_capacity(self.outbox.len() + 1);
        if reconnect {
            frames.push(ClientEnvelope::control(ClientControl::RequestSnapshot));
        }
        frames.extend(self.outbox.drain(..));
        frames
    }

    /// The transport dropped (or a reconnect attempt failed). Returns the
    /// delay before the next attempt, or `None` once attempts are exhausted
    /// or the client was closed.
    pub fn on_disconnect(&mut self) -> Option<Duration> {
        if self.status == ConnectionStatus::Disconnected {
            return None;
        }
        match self.policy.next_delay(self.reconnect_attempts) {
            Some(delay) => {
                self.reconnect_attempts += 1;
                self.status = ConnectionStatus::Reconnecting {
                    attempt: self.reconnect_attempts,
                };
                Some(delay)
            }
            None => {
                self.status = ConnectionStatus::Disconnected;
                None
            }
        }
    }

    pub fn close(&mut self) {
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn on_server_message(&mut self, envelope: ServerEnvelope) -> ServerOutcome {
        let mut outcome = ServerOutcome::default();
        match envelope.body {
            ServerBody::Change(change) => {
                if let Some(version) = envelope.version {
                    if self.has_snapshot && version > self.state.version + 1 {
                        debug!(
                            local = self.state.version,
                            remote = version,
                            "version gap; requesting snapshot"
                        );
                        outcome.request_snapshot = true;
                    }
                }
                if let Err(err) = change.apply_to(&mut self.state) {
                    warn!(
                        change = change.kind().changed_type(),
                        error = %err,
                        "change does not fit local state; requesting snapshot"
                    );
                    outcome.request_snapshot = true;
                }
                if let Some(version) = envelope.version {
                    self.state.version = self.state.version.max(version);
                }
                outcome.events.push(SyncEvent::Changed {
                    change,
                    player_id: envelope.player_id,
                    version: envelope.version,
                });
            }
            ServerBody::Event(ServerEvent::Snapshot {
                state,
                players,
                your_player_id,
            }) => {
                if envelope.timestamp < self.last_applied_snapshot_timestamp {
                    warn!(
                        timestamp = envelope.timestamp,
                        last_applied = self.last_applied_snapshot_timestamp,
                        version = state.version,
                        "snapshot rejected as stale"
                    );
                    outcome.events.push(SyncEvent::SnapshotRejected {
                        timestamp: envelope.timestamp,
                        last_applied: self.last_applied_snapshot_timestamp,
                    });
                } else {
                    self.last_applied_snapshot_timestamp = envelope.timestamp;
                    self.state = state;
                    self.players = players;
                    self.has_snapshot = true;
                    if your_player_id.is_some() {
                        self.player_id = your_player_id;
                    }
                    self.drop_dangling_selection();
                    outcome.events.push(SyncEvent::Snapshot {
                        version: self.state.version,
                        timestamp: envelope.timestamp,
                    });
                }
            }
            ServerBody::Event(ServerEvent::PlayerJoined { player }) => {
                self.players.retain(|p| p.id != player.id);
                self.players.push(player.clone());
                outcome.events.push(SyncEvent::PlayerJoined { player });
            }
            ServerBody::Event(ServerEvent::PlayerLeft { player }) => {
                self.players.retain(|p| p.id != player.id);
                outcome.events.push(SyncEvent::PlayerLeft { player_id: player.id });
            }
            ServerBody::Event(ServerEvent::Error {
                code,
                message,
                rejected_type,
            }) => {
                warn!(code = code.as_str(), %message, "coordinator reported an error");
                // our optimistic copy holds an edit the coordinator never stored
                if rejected_type.as_deref().is_some_and(is_mutating_type) {
                    outcome.request_snapshot = true;
                }
                outcome.events.push(SyncEvent::ServerError {
                    code,
                    message,
                    rejected_type,
                });
            }
            ServerBody::Event(ServerEvent::Pong) => {}
        }
        outcome
    }

    fn drop_dangling_selection(&mut self) {
        let dangling = self
            .local
            .selected_track
            .as_deref()
            .is_some_and(|id| self.state.track(id).is_none());
        if dangling {
            self.local = LocalState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::LocalAction;
    use boardwalk_core::{BackoffConfig, Mutation, Track};

    fn core() -> SyncCore {
        SyncCore::new(ReconnectPolicy::default(), 4)
    }

    fn snapshot_at(timestamp: u64, state: SessionState) -> ServerEnvelope {
        let mut envelope = ServerEnvelope::snapshot(state, Vec::new(), Some("me".into()));
        envelope.timestamp = timestamp;
        envelope
    }

    fn state_with_track(version: u64) -> SessionState {
        let mut state = SessionState {
            version,
            ..SessionState::default()
        };
        state.tracks.push(Track::new("t1", "Kick", "kick"));
        state
    }

    #[test_timeout::timeout]
    fn older_snapshot_is_rejected() {
        let mut core = core();
        core.on_server_message(snapshot_at(2_000, state_with_track(7)));
        assert_eq!(core.last_applied_snapshot_timestamp(), 2_000);

        let outcome = core.on_server_message(snapshot_at(1_000, SessionState::default()));
        assert_eq!(
            outcome.events,
            vec![SyncEvent::SnapshotRejected {
                timestamp: 1_000,
                last_applied: 2_000
            }]
        );
        assert_eq!(core.state().version, 7);
        assert_eq!(core.state().tracks.len(), 1);

        let outcome = core.on_server_message(snapshot_at(2_000, state_with_track(8)));
        assert!(matches!(
            outcome.events[0],
            SyncEvent::Snapshot { version: 8, .. }
        ));
        assert_eq!(core.player_id(), Some("me"));
    }

    #[test_timeout::timeout]
    fn local_actions_never_reach_the_outbox() {
        let mut core = core();
        core.on_server_message(snapshot_at(1, state_with_track(1)));
        core.send(Action::Local(LocalAction::SelectTrack(Some("t1".into()))))
            .expect("local");
        core.send(Action::Local(LocalAction::FocusStep(Some(3))))
            .expect("local");
        assert_eq!(core.pending(), 0);
        assert_eq!(core.local().selected_track.as_deref(), Some("t1"));
        assert_eq!(core.local().focused_step, Some(3));

        core.send(Action::Mutate(Mutation::ToggleStep {
            track_id: "t1".into(),
            step: 3,
        }))
        .expect("mutate");
        assert_eq!(core.pending(), 1);
        assert!(core.state().tracks[0].steps[3], "applied optimistically");
    }

    #[test_timeout::timeout]
    fn full_outbox_rejects_without_applying() {
        let mut core = core();
        core.on_server_message(snapshot_at(1, SessionState::default()));
        for tempo in [100, 101, 102, 103] {
            core.send(Mutation::SetTempo { tempo }.into()).expect("queue");
        }
        let err = core
            .send(Mutation::SetTempo { tempo: 150 }.into())
            .unwrap_err();
        assert!(matches!(err, SyncError::OutboxFull { capacity: 4 }));
        assert_eq!(core.state().tempo, 103);
    }

    #[test_timeout::timeout]
    fn reconnect_sends_snapshot_request_before_queued_intents() {
        let mut core = core();
        assert!(core.on_connected().is_empty(), "first connect has nothing to send");

        assert!(core.on_disconnect().is_some());
        core.send(Mutation::SetSwing { swing: 40 }.into())
            .expect("queue offline");
        assert!(core.take_outbox().is_empty(), "not sent while offline");

        let frames = core.on_connected();
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].body,
            boardwalk_core::ClientBody::Control(ClientControl::RequestSnapshot)
        );
        assert_eq!(
            frames[1].body,
            boardwalk_core::ClientBody::Mutation(Mutation::SetSwing { swing: 40 })
        );
        assert_eq!(core.pending(), 0);
        assert_eq!(core.reconnect_attempts(), 0);

        // sent intents are gone for good
        assert!(core.on_disconnect().is_some());
        let frames = core.on_connected();
        assert_eq!(frames.len(), 1);
    }

    #[test_timeout::timeout]
    fn reconnect_attempts_are_capped() {
        let policy = ReconnectPolicy {
            backoff: BackoffConfig {
                max_attempts: 3,
                ..BackoffConfig::default()
            },
        };
        let mut core = SyncCore::new(policy, 8);
        core.on_connected();
        for attempt in 1..=3 {
            assert!(core.on_disconnect().is_some());
            assert_eq!(core.status(), ConnectionStatus::Reconnecting { attempt });
        }
        assert_eq!(core.on_disconnect(), None);
        assert_eq!(core.status(), ConnectionStatus::Disconnected);
        assert!(matches!(
            core.send(Mutation::SetTempo { tempo: 90 }.into()),
            Err(SyncError::Closed)
        ));
    }

    #[test_timeout::timeout]
    fn version_gap_requests_snapshot() {
        let mut core = core();
        core.on_server_message(snapshot_at(1, state_with_track(5)));

        let next = ServerEnvelope::change(Change::SetTempoChanged { tempo: 90 }, None, 6);
        assert!(!core.on_server_message(next).request_snapshot);

        let skipped = ServerEnvelope::change(Change::SetSwingChanged { swing: 10 }, None, 9);
        let outcome = core.on_server_message(skipped);
        assert!(outcome.request_snapshot);
        assert_eq!(core.state().version, 9);
        assert_eq!(core.state().swing, 10);
    }

    #[test_timeout::timeout]
    fn echoed_change_is_idempotent_after_optimistic_apply() {
        let mut core = core();
        core.on_server_message(snapshot_at(1, state_with_track(1)));
        core.send(
            Mutation::ToggleStep {
                track_id: "t1".into(),
                step: 0,
            }
            .into(),
        )
        .expect("send");
        let echo = ServerEnvelope::change(
            Change::ToggleStepChanged {
                track_id: "t1".into(),
                step: 0,
                active: true,
            },
            Some("me".into()),
            2,
        );
        core.on_server_message(echo.clone());
        core.on_server_message(echo);
        assert!(core.state().tracks[0].steps[0]);
        assert_eq!(core.state().version, 2);
    }

    #[test_timeout::timeout]
    fn divergent_change_requests_snapshot() {
        let mut core = core();
        core.on_server_message(snapshot_at(1, SessionState::default()));
        let change = ServerEnvelope::change(
            Change::RenameTrackChanged {
                track_id: "ghost".into(),
                name: "Boo".into(),
            },
            None,
            2,
        );
        assert!(core.on_server_message(change).request_snapshot);
    }

    #[test_timeout::timeout]
    fn rejected_mutation_requests_snapshot() {
        let mut core = core();
        core.on_server_message(snapshot_at(1, SessionState::default()));
        core.send(Mutation::SetTempo { tempo: 90 }.into())
            .expect("queue");
        assert_eq!(core.state().tempo, 90);

        let outcome = core.on_server_message(ServerEnvelope::error(
            ErrorCode::PersistenceFailed,
            "fast store unavailable",
            Some("set_tempo".into()),
        ));
        assert!(matches!(
            &outcome.events[..],
            [SyncEvent::ServerError {
                code: ErrorCode::PersistenceFailed,
                ..
            }]
        ));
        assert!(outcome.request_snapshot);

        let outcome = core.on_server_message(ServerEnvelope::error(
            ErrorCode::ValidationFailed,
            "tempo 10 outside 60..=180 bpm",
            Some("set_tempo".into()),
        ));
        assert!(outcome.request_snapshot);
    }

    #[test_timeout::timeout]
    fn non_mutation_errors_keep_local_state() {
        let mut core = core();
        let outcome = core.on_server_message(ServerEnvelope::error(
            ErrorCode::MalformedMessage,
            "unknown message type",
            Some("launch_rocket".into()),
        ));
        assert!(matches!(
            &outcome.events[..],
            [SyncEvent::ServerError {
                code: ErrorCode::MalformedMessage,
                ..
            }]
        ));
        assert!(!outcome.request_snapshot);

        let outcome = core.on_server_message(ServerEnvelope::error(
            ErrorCode::MalformedMessage,
            "expected a JSON object",
            None,
        ));
        assert!(!outcome.request_snapshot);
    }
}
