use boardwalk_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("outbox full ({capacity} pending mutations)")]
    OutboxFull { capacity: usize },
    #[error("sync client is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("mutation rejected locally: {0}")]
    Invalid(#[from] ValidationError),
}
