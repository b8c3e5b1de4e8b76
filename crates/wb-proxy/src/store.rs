//! Key/value control plane the reverse proxy reads its routing from.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::errors::{ProxyError, Result};

/// String key/value store with an atomic multi-set.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set one key.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set every entry in one atomic batch.
    async fn set_many(&self, entries: &[(String, String)]) -> Result<()>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;
}

/// Redis-backed store sharing one multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        debug!(url, "connected to control plane");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        let _ = pipe.atomic();
        for (key, value) in entries {
            let _ = pipe.cmd("SET").arg(key).arg(value).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed = redis::cmd("DEL")
            .arg(keys)
            .query_async::<_, u64>(&mut conn)
            .await?;
        Ok(removed)
    }
}

/// In-process store for tests and single-node development.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    rejected: Mutex<Vec<String>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }

    /// Fail batch writes carrying a value that contains `needle`.
    pub fn reject_writes_containing(&self, needle: impl Into<String>) {
        self.rejected.lock().push(needle.into());
    }

    /// Stop failing writes.
    pub fn accept_all_writes(&self) {
        self.rejected.lock().clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _ = self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        {
            let rejected = self.rejected.lock();
            if let Some((key, _)) = entries
                .iter()
                .find(|(_, value)| rejected.iter().any(|needle| value.contains(needle.as_str())))
            {
                return Err(ProxyError::Unavailable(format!("write to {key} rejected")));
            }
        }
        let mut map = self.entries.lock();
        for (key, value) in entries {
            let _ = map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut map = self.entries.lock();
        Ok(keys.iter().filter(|k| map.remove(k.as_str()).is_some()).count() as u64)
    }
}
