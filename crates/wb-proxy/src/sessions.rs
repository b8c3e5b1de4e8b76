//! Live editor sessions and the proxy hashes each one owns.
//!
//! `session:{id}` holds the JSON record; `proxy:{hash}` points back to the
//! owning session id so forward-auth can resolve a hash in one lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use wb_core::ids::SessionId;

use crate::errors::Result;
use crate::store::KeyValueStore;

/// Stored session record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub id: String,
    /// Email of the session's principal.
    pub user_email: String,
    /// Proxy hashes registered by the session.
    pub proxy_hashes: Vec<String>,
}

fn session_key(id: &str) -> String {
    format!("session:{id}")
}

fn proxy_key(hash: &str) -> String {
    format!("proxy:{hash}")
}

/// Session registry over a [`KeyValueStore`].
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
    // serialises read-modify-write of session records within this process
    write_lock: Arc<Mutex<()>>,
}

impl SessionRegistry {
    /// Registry over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Record a new session for `user_email`.
    pub async fn start_session(&self, user_email: &str) -> Result<SessionId> {
        let id = SessionId::new();
        let record = SessionRecord {
            id: id.to_string(),
            user_email: user_email.to_string(),
            proxy_hashes: Vec::new(),
        };
        self.put(&record).await?;
        debug!(session = %id, "session started");
        Ok(id)
    }

    /// Delete the session and every `proxy:{hash}` it owns.
    pub async fn end_session(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(record) = self.get(id).await? {
            let keys: Vec<String> = record.proxy_hashes.iter().map(|h| proxy_key(h)).collect();
            let _ = self.store.delete(&keys).await?;
            let _ = self.store.delete(&[session_key(id)]).await?;
            debug!(session = id, hashes = keys.len(), "session ended");
        }
        Ok(())
    }

    /// Record `hash` against session `id`. No-op for unknown sessions or
    /// hashes already recorded.
    pub async fn add_proxy_hash(&self, id: &str, hash: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.get(id).await? else {
            return Ok(());
        };
        if record.proxy_hashes.iter().any(|h| h == hash) {
            return Ok(());
        }
        record.proxy_hashes.push(hash.to_string());
        self.store
            .set_many(&[
                (session_key(id), serde_json::to_string(&record)?),
                (proxy_key(hash), id.to_string()),
            ])
            .await
    }

    /// Forget `hash` for session `id`.
    pub async fn remove_proxy_hash(&self, id: &str, hash: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.get(id).await? else {
            return Ok(());
        };
        let before = record.proxy_hashes.len();
        record.proxy_hashes.retain(|h| h != hash);
        if record.proxy_hashes.len() == before {
            return Ok(());
        }
        self.put(&record).await?;
        let _ = self.store.delete(&[proxy_key(hash)]).await?;
        Ok(())
    }

    /// The session owning `hash`, if it is still live.
    pub async fn session_by_proxy_hash(&self, hash: &str) -> Result<Option<SessionRecord>> {
        match self.store.get(&proxy_key(hash)).await? {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    /// Session record by id.
    pub async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        match self.store.get(&session_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &SessionRecord) -> Result<()> {
        self.store
            .set(&session_key(&record.id), &serde_json::to_string(record)?)
            .await
    }
}
