use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use boardwalk_core::SessionId;
use parking_lot::Mutex;

use super::{SessionStore, StoreError, StoredSession};

/// Process-local store for `memory://` URLs and tests. Writes and reads can be
/// made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    name: &'static str,
    records: Mutex<HashMap<SessionId, StoredSession>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, session_id: &str) -> Option<StoredSession> {
        self.records.lock().get(session_id).cloned()
    }

    pub fn insert(&self, session_id: impl Into<SessionId>, record: StoredSession) {
        self.records.lock().insert(session_id.into(), record);
    }

    pub fn remove(&self, session_id: &str) -> Option<StoredSession> {
        self.records.lock().remove(session_id)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn name(&self) -> &'static str {
        if self.name.is_empty() {
            "memory"
        } else {
            self.name
        }
    }

    async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(self.name()));
        }
        Ok(self.get(session_id))
    }

    async fn save(&self, session_id: &str, record: &StoredSession) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(self.name()));
        }
        self.insert(session_id, record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_if_newer(
        &self,
        session_id: &str,
        record: &StoredSession,
    ) -> Result<bool, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(self.name()));
        }
        let mut records = self.records.lock();
        if records
            .get(session_id)
            .is_some_and(|stored| stored.state.version >= record.state.version)
        {
            return Ok(false);
        }
        records.insert(session_id.to_string(), record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Origin, Stores};
    use boardwalk_core::SessionState;
    use std::sync::Arc;

    fn record(version: u64) -> StoredSession {
        StoredSession::new(SessionState {
            version,
            ..SessionState::default()
        })
    }

    #[test_timeout::tokio_timeout_test]
    async fn failing_writes_leave_records_untouched() {
        let store = MemoryStore::named("fast");
        store.save("s1", &record(1)).await.expect("save");
        store.set_fail_writes(true);
        assert!(store.save("s1", &record(2)).await.is_err());
        assert_eq!(store.get("s1").map(|r| r.state.version), Some(1));
        assert_eq!(store.save_count(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn older_flush_never_replaces_a_newer_one() {
        let store = MemoryStore::named("backup");
        assert!(store.save_if_newer("s1", &record(7)).await.expect("save"));
        assert!(!store.save_if_newer("s1", &record(5)).await.expect("save"));
        assert!(!store.save_if_newer("s1", &record(7)).await.expect("save"));
        assert_eq!(store.get("s1").map(|r| r.state.version), Some(7));
        assert!(store.save_if_newer("s1", &record(8)).await.expect("save"));
        assert_eq!(store.get("s1").map(|r| r.state.version), Some(8));
        assert_eq!(store.save_count(), 2);

        store.set_fail_writes(true);
        assert!(store.save_if_newer("s1", &record(9)).await.is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn load_latest_prefers_fast_then_backup() {
        let fast = Arc::new(MemoryStore::named("fast"));
        let backup = Arc::new(MemoryStore::named("backup"));
        let stores = Stores::new(fast.clone(), backup.clone());

        assert!(stores.load_latest("s1").await.expect("load").is_none());

        backup.insert("s1", record(3));
        let (found, origin) = stores.load_latest("s1").await.expect("load").expect("found");
        assert_eq!((found.state.version, origin), (3, Origin::Backup));

        fast.insert("s1", record(5));
        let (found, origin) = stores.load_latest("s1").await.expect("load").expect("found");
        assert_eq!((found.state.version, origin), (5, Origin::Fast));

        fast.set_fail_reads(true);
        let (found, origin) = stores.load_latest("s1").await.expect("load").expect("found");
        assert_eq!((found.state.version, origin), (3, Origin::Backup));

        backup.remove("s1");
        assert!(stores.load_latest("s1").await.is_err());
    }
}
