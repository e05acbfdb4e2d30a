//! WebSocket envelopes.
//!
//! Every frame is one JSON object whose `type` field selects the body. The
//! envelope fields (`timestamp`, and on the server side `player_id` and
//! `version`) sit next to the body fields at the top level.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::SessionState;
use crate::mutation::{Change, Mutation};
use crate::time::now_millis;

pub type SessionId = String;
pub type PlayerId = String;

/// `player_id` on frames the coordinator sends on its own behalf. Real player
/// ids are uuids, so this never names a connection.
pub const SERVER_PLAYER_ID: &str = "server";

/// Per-connection identity. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub color: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(flatten)]
    pub body: ClientBody,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientBody {
    Mutation(Mutation),
    Control(ClientControl),
}

/// Non-mutating client requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControl {
    RequestSnapshot,
    Ping,
}

impl ClientEnvelope {
    pub fn mutation(mutation: Mutation) -> Self {
        Self {
            body: ClientBody::Mutation(mutation),
            timestamp: now_millis(),
        }
    }

    pub fn control(control: ClientControl) -> Self {
        Self {
            body: ClientBody::Control(control),
            timestamp: now_millis(),
        }
    }

    /// Decodes one text frame, keeping the offending `type` (when there is
    /// one) for the error reply.
    pub fn decode(text: &str) -> Result<Self, MalformedMessage> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|err| MalformedMessage {
                type_name: None,
                reason: err.to_string(),
            })?;
        let type_name = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_string);
        serde_json::from_value(value).map_err(|err| MalformedMessage {
            reason: match &type_name {
                Some(name) => format!("unknown or invalid message type {name:?}: {err}"),
                None => "missing message type".to_string(),
            },
            type_name,
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{reason}")]
pub struct MalformedMessage {
    pub type_name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub body: ServerBody,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerBody {
    Change(Change),
    Event(ServerEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Snapshot {
        state: SessionState,
        players: Vec<PlayerInfo>,
        #[serde(default)]
        your_player_id: Option<PlayerId>,
    },
    PlayerJoined {
        player: PlayerInfo,
    },
    PlayerLeft {
        player: PlayerInfo,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default)]
        rejected_type: Option<String>,
    },
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationFailed,
    PersistenceFailed,
    MalformedMessage,
    SessionUnavailable,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::PersistenceFailed => "persistence_failed",
            ErrorCode::MalformedMessage => "malformed_message",
            ErrorCode::SessionUnavailable => "session_unavailable",
        }
    }
}

impl ServerEnvelope {
    /// Broadcast of an applied mutation. `version` is the session version
    /// after the apply.
    pub fn change(change: Change, player_id: Option<PlayerId>, version: u64) -> Self {
        Self {
            body: ServerBody::Change(change),
            timestamp: now_millis(),
            player_id,
            version: Some(version),
        }
    }

    /// Attributed to the recipient, who asked for it by joining or by
    /// sending `request_snapshot`.
    pub fn snapshot(
        state: SessionState,
        players: Vec<PlayerInfo>,
        your_player_id: Option<PlayerId>,
    ) -> Self {
        let version = state.version;
        let player_id = your_player_id.clone();
        Self {
            body: ServerBody::Event(ServerEvent::Snapshot {
                state,
                players,
                your_player_id,
            }),
            timestamp: now_millis(),
            player_id,
            version: Some(version),
        }
    }

    /// Replaces the attribution, e.g. with [`SERVER_PLAYER_ID`] for
    /// snapshots pushed after an HTTP overwrite.
    pub fn attributed_to(mut self, player_id: impl Into<PlayerId>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn player_joined(player: PlayerInfo, version: u64) -> Self {
        let player_id = Some(player.id.clone());
        Self {
            body: ServerBody::Event(ServerEvent::PlayerJoined { player }),
            timestamp: now_millis(),
            player_id,
            version: Some(version),
        }
    }

    pub fn player_left(player: PlayerInfo, version: u64) -> Self {
        let player_id = Some(player.id.clone());
        Self {
            body: ServerBody::Event(ServerEvent::PlayerLeft { player }),
            timestamp: now_millis(),
            player_id,
            version: Some(version),
        }
    }

    pub fn error(
        code: ErrorCode,
        message: impl Into<String>,
        rejected_type: Option<String>,
    ) -> Self {
        Self {
            body: ServerBody::Event(ServerEvent::Error {
                code,
                message: message.into(),
                rejected_type,
            }),
            timestamp: now_millis(),
            player_id: None,
            version: None,
        }
    }

    pub fn pong() -> Self {
        Self {
            body: ServerBody::Event(ServerEvent::Pong),
            timestamp: now_millis(),
            player_id: None,
            version: None,
        }
    }

    /// Wire `type` of this frame.
    pub fn type_name(&self) -> &'static str {
        match &self.body {
            ServerBody::Change(change) => change.kind().changed_type(),
            ServerBody::Event(ServerEvent::Snapshot { .. }) => "snapshot",
            ServerBody::Event(ServerEvent::PlayerJoined { .. }) => "player_joined",
            ServerBody::Event(ServerEvent::PlayerLeft { .. }) => "player_left",
            ServerBody::Event(ServerEvent::Error { .. }) => "error",
            ServerBody::Event(ServerEvent::Pong) => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Track;

    #[test_timeout::timeout]
    fn client_frames_decode_by_type() {
        let envelope =
            ClientEnvelope::decode(r#"{"type":"set_tempo","tempo":140,"timestamp":17}"#)
                .expect("decode");
        assert_eq!(envelope.timestamp, 17);
        assert_eq!(
            envelope.body,
            ClientBody::Mutation(Mutation::SetTempo { tempo: 140 })
        );

        let snapshot = ClientEnvelope::decode(r#"{"type":"request_snapshot"}"#).expect("decode");
        assert_eq!(
            snapshot.body,
            ClientBody::Control(ClientControl::RequestSnapshot)
        );
        assert_eq!(snapshot.timestamp, 0);
    }

    #[test_timeout::timeout]
    fn malformed_frames_keep_the_offending_type() {
        let err = ClientEnvelope::decode(r#"{"type":"launch_fireworks"}"#).unwrap_err();
        assert_eq!(err.type_name.as_deref(), Some("launch_fireworks"));

        let err = ClientEnvelope::decode(r#"{"type":"set_tempo","tempo":"fast"}"#).unwrap_err();
        assert_eq!(err.type_name.as_deref(), Some("set_tempo"));

        let err = ClientEnvelope::decode("not json").unwrap_err();
        assert_eq!(err.type_name, None);

        let err = ClientEnvelope::decode(r#"{"tempo":120}"#).unwrap_err();
        assert_eq!(err.type_name, None);
    }

    #[test_timeout::timeout]
    fn server_frames_are_flat_objects() {
        let change = ServerEnvelope::change(
            Change::ToggleStepChanged {
                track_id: "t1".into(),
                step: 2,
                active: true,
            },
            Some("p1".into()),
            9,
        );
        let json = serde_json::to_value(&change).expect("encode");
        assert_eq!(json["type"], "toggle_step_changed");
        assert_eq!(json["track_id"], "t1");
        assert_eq!(json["active"], true);
        assert_eq!(json["player_id"], "p1");
        assert_eq!(json["version"], 9);

        let decoded: ServerEnvelope = serde_json::from_value(json).expect("decode");
        assert_eq!(decoded, change);
        assert_eq!(decoded.type_name(), "toggle_step_changed");
    }

    #[test_timeout::timeout]
    fn snapshot_and_error_frames_decode_as_events() {
        let mut state = SessionState::default();
        state.tracks.push(Track::new("t1", "Kick", "kick"));
        let snapshot = ServerEnvelope::snapshot(state.clone(), Vec::new(), Some("me".into()));
        let text = serde_json::to_string(&snapshot).expect("encode");
        let decoded: ServerEnvelope = serde_json::from_str(&text).expect("decode");
        assert_eq!(decoded.version, Some(state.version));
        assert_eq!(decoded.player_id.as_deref(), Some("me"));
        match decoded.body {
            ServerBody::Event(ServerEvent::Snapshot {
                state: decoded_state,
                your_player_id,
                ..
            }) => {
                assert_eq!(decoded_state, state);
                assert_eq!(your_player_id.as_deref(), Some("me"));
            }
            other => panic!("unexpected body {other:?}"),
        }

        let error = ServerEnvelope::error(
            ErrorCode::ValidationFailed,
            "tempo 500 outside 60..=180 bpm",
            Some("set_tempo".into()),
        );
        let json = serde_json::to_value(&error).expect("encode");
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "validation_failed");
        assert_eq!(json["rejected_type"], "set_tempo");
    }

    #[test_timeout::timeout]
    fn roster_frames_survive_the_envelope_fields() {
        let player = PlayerInfo {
            id: "p7".into(),
            name: "Sandy Gull".into(),
            color: 3,
        };
        for frame in [
            ServerEnvelope::player_joined(player.clone(), 4),
            ServerEnvelope::player_left(player.clone(), 4),
        ] {
            let text = serde_json::to_string(&frame).expect("encode");
            let decoded: ServerEnvelope = serde_json::from_str(&text).expect("decode");
            assert_eq!(decoded.player_id.as_deref(), Some("p7"));
            assert_eq!(decoded, frame);
        }
    }
}
