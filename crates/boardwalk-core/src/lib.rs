//! Boardwalk core: the pieces shared by the session coordinator and its clients.
//!
//! - [`model`]: the authoritative session document (tracks, tempo, swing, version)
//! - [`mutation`]: the single `Mutation` sum type and everything derived from it
//!   (mutating-type registry, validation/apply, `Change` broadcasts)
//! - [`protocol`]: JSON envelopes exchanged over the WebSocket
//! - [`backoff`]: jittered exponential backoff and a bounded retry helper

pub mod backoff;
pub mod error;
pub mod model;
pub mod mutation;
pub mod protocol;
pub mod time;

pub use backoff::{BackoffConfig, ReconnectPolicy};
pub use error::ValidationError;
pub use model::{ParameterLock, SessionContent, SessionState, Track, TrackId};
pub use mutation::{is_mutating_type, Change, Mutation, MutationKind};
pub use protocol::{
    ClientBody, ClientControl, ClientEnvelope, ErrorCode, MalformedMessage, PlayerId, PlayerInfo,
    ServerBody, ServerEnvelope, ServerEvent, SessionId, SERVER_PLAYER_ID,
};
pub use time::now_millis;
