//! Client side of Boardwalk session sync.
//!
//! [`SyncCore`] holds the reconciliation rules (optimistic apply, snapshot
//! staleness, outbox, reconnect bookkeeping) with no I/O. [`SyncClient`]
//! drives it over a tokio-tungstenite WebSocket and reports [`SyncEvent`]s.

mod action;
mod config;
mod driver;
mod error;
mod reconcile;

pub use crate::action::{Action, LocalAction, LocalState};
pub use crate::config::ClientConfig;
pub use crate::driver::SyncClient;
pub use crate::error::SyncError;
pub use crate::reconcile::{ConnectionStatus, ServerOutcome, SyncCore, SyncEvent};
