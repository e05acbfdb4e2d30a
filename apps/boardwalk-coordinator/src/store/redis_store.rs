use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::{SessionStore, StoreError, StoredSession};

/// Writes ARGV[1] unless the stored record's `state.version` is already at
/// least ARGV[2]. ARGV[3] is the TTL in seconds, 0 for none.
const SAVE_IF_NEWER: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, stored = pcall(cjson.decode, current)
  if ok and type(stored) == 'table' and type(stored.state) == 'table'
      and tonumber(stored.state.version) ~= nil
      and tonumber(stored.state.version) >= tonumber(ARGV[2]) then
    return 0
  end
end
if tonumber(ARGV[3]) > 0 then
  redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
else
  redis.call('SET', KEYS[1], ARGV[1])
end
return 1
"#;

/// Key scheme for one store role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// `boardwalk:session:{id}:state`
    Fast,
    /// `boardwalk:backup:{id}`
    Backup,
}

impl KeyLayout {
    pub fn key(self, session_id: &str) -> String {
        match self {
            KeyLayout::Fast => format!("boardwalk:session:{session_id}:state"),
            KeyLayout::Backup => format!("boardwalk:backup:{session_id}"),
        }
    }

    pub fn store_name(self) -> &'static str {
        match self {
            KeyLayout::Fast => "fast",
            KeyLayout::Backup => "backup",
        }
    }
}

#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    layout: KeyLayout,
    ttl_seconds: Option<u64>,
}

impl RedisStore {
    pub async fn connect(
        url: &str,
        layout: KeyLayout,
        ttl: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self {
            redis,
            layout,
            ttl_seconds: ttl.map(|ttl| ttl.as_secs()).filter(|secs| *secs > 0),
        })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    fn name(&self) -> &'static str {
        self.layout.store_name()
    }

    async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, StoreError> {
        let mut conn = self.redis.clone();
        let key = self.layout.key(session_id);
        let Some(json) = conn.get::<_, Option<String>>(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                session_id: session_id.to_string(),
                source,
            })
    }

    async fn save(&self, session_id: &str, record: &StoredSession) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let key = self.layout.key(session_id);
        let json = serde_json::to_string(record).map_err(|source| StoreError::Encode {
            session_id: session_id.to_string(),
            source,
        })?;
        match self.ttl_seconds {
            Some(ttl) => conn.set_ex::<_, _, ()>(&key, json, ttl).await?,
            None => conn.set::<_, _, ()>(&key, json).await?,
        }
        Ok(())
    }

    async fn save_if_newer(
        &self,
        session_id: &str,
        record: &StoredSession,
    ) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let key = self.layout.key(session_id);
        let json = serde_json::to_string(record).map_err(|source| StoreError::Encode {
            session_id: session_id.to_string(),
            source,
        })?;
        let written: i64 = Script::new(SAVE_IF_NEWER)
            .key(&key)
            .arg(json)
            .arg(record.state.version)
            .arg(self.ttl_seconds.unwrap_or(0))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn key_layouts_match_persisted_format() {
        assert_eq!(KeyLayout::Fast.key("abc"), "boardwalk:session:abc:state");
        assert_eq!(KeyLayout::Backup.key("abc"), "boardwalk:backup:abc");
    }
}
