use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ArtifactStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// Process-local store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> StoreResult<bool> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl(ttl));
        }
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        self.lock()?.insert(
            key.to_string(),
            Entry {
                payload: bytes.to_vec(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.payload.clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .get(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false))
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_absent_key() {
        let store = MemoryArtifactStore::new();
        assert!(store
            .put("docx:a", b"\x00\x01payload", Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(
            store.get("docx:a").await.unwrap().as_deref(),
            Some(&b"\x00\x01payload"[..])
        );
        assert_eq!(store.get("docx:missing").await.unwrap(), None);
        assert!(store.delete("docx:a").await.unwrap());
        assert!(!store.exists("docx:a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let store = MemoryArtifactStore::new();
        store
            .put("docx:short", b"s", Duration::from_secs(10))
            .await
            .unwrap();
        store
            .put("docx:long", b"l", Duration::from_secs(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(store.get("docx:short").await.unwrap(), None);
        assert!(store.exists("docx:long").await.unwrap());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
