//! Session persistence.
//!
//! Two stores back every session: a fast store written before each broadcast
//! and a backup store written when the last connection leaves. Both speak the
//! same [`SessionStore`] trait; `redis://` URLs get [`RedisStore`], `memory://`
//! gets [`MemoryStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boardwalk_core::{SessionId, SessionState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::{KeyLayout, RedisStore};

/// What a store holds for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub state: SessionState,
    /// Milliseconds since the Unix epoch of the write.
    pub updated_at: u64,
}

impl StoredSession {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            updated_at: boardwalk_core::now_millis(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode session {session_id}: {source}")]
    Encode {
        session_id: SessionId,
        source: serde_json::Error,
    },
    #[error("stored record for {session_id} is corrupt: {source}")]
    Decode {
        session_id: SessionId,
        source: serde_json::Error,
    },
    #[error("{0} store is unavailable")]
    Unavailable(&'static str),
    #[error("unsupported store url {0:?} (expected redis:// or memory://)")]
    UnsupportedUrl(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, StoreError>;

    async fn save(&self, session_id: &str, record: &StoredSession) -> Result<(), StoreError>;

    /// Writes `record` only if the stored copy is missing or holds a lower
    /// version. Returns whether the write happened.
    async fn save_if_newer(
        &self,
        session_id: &str,
        record: &StoredSession,
    ) -> Result<bool, StoreError>;
}

pub type SharedStore = Arc<dyn SessionStore>;

/// Opens a store from a URL.
pub async fn open(
    url: &str,
    layout: KeyLayout,
    ttl: Option<Duration>,
) -> Result<SharedStore, StoreError> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(MemoryStore::named(layout.store_name())));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let store = RedisStore::connect(url, layout, ttl).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::UnsupportedUrl(url.to_string()))
}

/// Where a hydrated session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Fast,
    Backup,
    Fresh,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Fast => "fast",
            Origin::Backup => "backup",
            Origin::Fresh => "fresh",
        }
    }
}

/// The fast/backup pair shared by every session actor.
#[derive(Clone)]
pub struct Stores {
    pub fast: SharedStore,
    pub backup: SharedStore,
}

impl Stores {
    pub fn new(fast: SharedStore, backup: SharedStore) -> Self {
        Self { fast, backup }
    }

    /// Fast store first, backup second. A fast-store error falls through to
    /// the backup; if the backup also errors, the fast-store error wins.
    pub async fn load_latest(
        &self,
        session_id: &str,
    ) -> Result<Option<(StoredSession, Origin)>, StoreError> {
        let fast_err = match self.fast.load(session_id).await {
            Ok(Some(record)) => return Ok(Some((record, Origin::Fast))),
            Ok(None) => None,
            Err(err) => {
                warn!(session_id, store = self.fast.name(), error = %err, "fast store load failed");
                Some(err)
            }
        };
        match self.backup.load(session_id).await {
            Ok(Some(record)) => Ok(Some((record, Origin::Backup))),
            Ok(None) => match fast_err {
                Some(err) => Err(err),
                None => Ok(None),
            },
            Err(err) => Err(fast_err.unwrap_or(err)),
        }
    }
}
