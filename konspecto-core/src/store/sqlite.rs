use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hex::encode as hex_encode;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task;
use tracing::{debug, warn};

use super::{ArtifactStore, StoreError, StoreResult};

const ARTIFACT_SCHEMA: &str = include_str!("../../../sql/artifacts.sql");
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL;\n\
     PRAGMA synchronous = NORMAL;\n\
     PRAGMA temp_store = MEMORY;\n\
     PRAGMA busy_timeout = 5000;\n";

#[derive(Debug, Clone)]
pub struct SqliteArtifactStoreBuilder {
    path: Option<PathBuf>,
    create_if_missing: bool,
}

impl Default for SqliteArtifactStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
        }
    }
}

impl SqliteArtifactStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteArtifactStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteArtifactStore {
            path,
            flags,
            create_parent: self.create_if_missing,
        })
    }
}

/// Listing row for a live artifact, without its payload.
#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub key: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// SQLite-backed store. Every operation opens and closes its own connection.
#[derive(Debug, Clone)]
pub struct SqliteArtifactStore {
    path: PathBuf,
    flags: OpenFlags,
    create_parent: bool,
}

impl SqliteArtifactStore {
    pub fn builder() -> SqliteArtifactStoreBuilder {
        SqliteArtifactStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteArtifactStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        conn.execute_batch(CONNECTION_PRAGMAS).map_err(|source| StoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        if self.create_parent {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(ARTIFACT_SCHEMA)?;
        Ok(())
    }

    /// Live artifacts, most recent first.
    pub fn entries(&self, limit: usize) -> StoreResult<Vec<StoredArtifact>> {
        let conn = self.open()?;
        let now_ms = Utc::now().timestamp_millis();
        let mut stmt = conn.prepare(
            "SELECT key, size_bytes, sha256, created_at, expires_at_ms FROM artifacts \
             WHERE expires_at_ms > ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![now_ms, limit as i64], |row| {
                let expires_ms: i64 = row.get(4)?;
                Ok(StoredArtifact {
                    key: row.get(0)?,
                    size_bytes: row.get(1)?,
                    sha256: row.get(2)?,
                    created_at: row.get(3)?,
                    expires_at: Utc
                        .timestamp_millis_opt(expires_ms)
                        .single()
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn put_at(
        &self,
        key: &str,
        bytes: &[u8],
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let ttl_ms = i64::try_from(ttl.as_millis())
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        let expires_ms = now
            .timestamp_millis()
            .checked_add(ttl_ms)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        let conn = self.open()?;
        let changed = conn.execute(
            "INSERT OR REPLACE INTO artifacts (key, payload, size_bytes, sha256, created_at, expires_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key,
                bytes,
                bytes.len() as i64,
                checksum(bytes),
                now,
                expires_ms
            ],
        )?;
        debug!(key, size_bytes = bytes.len(), expires_ms, "artifact stored");
        Ok(changed == 1)
    }

    fn get_at(&self, key: &str, now: DateTime<Utc>) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.open()?;
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT payload, sha256 FROM artifacts WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now.timestamp_millis()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((payload, expected)) if checksum(&payload) == expected => Ok(Some(payload)),
            Some(_) => {
                warn!(key, "stored artifact checksum mismatch");
                Err(StoreError::Corrupted {
                    key: key.to_string(),
                })
            }
            None => Ok(None),
        }
    }

    fn exists_at(&self, key: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.open()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM artifacts WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now.timestamp_millis()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn delete_now(&self, key: &str) -> StoreResult<bool> {
        let conn = self.open()?;
        let changed = conn.execute("DELETE FROM artifacts WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }

    fn purge_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.open()?;
        let removed = conn.execute(
            "DELETE FROM artifacts WHERE expires_at_ms <= ?1",
            params![now.timestamp_millis()],
        )?;
        if removed > 0 {
            debug!(removed, "purged expired artifacts");
        }
        Ok(removed)
    }

    async fn blocking<T, F>(&self, operation: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SqliteArtifactStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        task::spawn_blocking(move || operation(store)).await?
    }
}

#[async_trait]
impl ArtifactStore for SqliteArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> StoreResult<bool> {
        let key = key.to_string();
        let bytes = bytes.to_vec();
        self.blocking(move |store| store.put_at(&key, &bytes, ttl, Utc::now()))
            .await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |store| store.get_at(&key, Utc::now()))
            .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.blocking(move |store| store.delete_now(&key)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.blocking(move |store| store.exists_at(&key, Utc::now()))
            .await
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.blocking(|store| store.purge_at(Utc::now())).await
    }
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SqliteArtifactStore {
        let store = SqliteArtifactStore::new(dir.path().join("nested/artifacts.sqlite")).unwrap();
        store.initialize().unwrap();
        store
    }

    #[test]
    fn expired_rows_are_invisible_and_purgeable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let written = Utc::now() - ChronoDuration::hours(2);
        assert!(store
            .put_at("docx:old", b"old", Duration::from_secs(3600), written)
            .unwrap());
        assert!(store
            .put_at("docx:new", b"new", Duration::from_secs(3600), Utc::now())
            .unwrap());

        assert_eq!(store.get_at("docx:old", Utc::now()).unwrap(), None);
        assert!(!store.exists_at("docx:old", Utc::now()).unwrap());
        assert_eq!(
            store.get_at("docx:old", written).unwrap().as_deref(),
            Some(&b"old"[..])
        );
        assert_eq!(store.entries(10).unwrap().len(), 1);

        assert_eq!(store.purge_at(Utc::now()).unwrap(), 1);
        assert_eq!(store.get_at("docx:old", written).unwrap(), None);
        assert!(store.exists_at("docx:new", Utc::now()).unwrap());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store
            .put_at("docx:k", b"x", Duration::ZERO, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTtl(_)));
    }

    #[test]
    fn tampered_payload_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .put_at("docx:k", b"original", Duration::from_secs(60), Utc::now())
            .unwrap();
        let conn = store.open().unwrap();
        conn.execute(
            "UPDATE artifacts SET payload = ?1 WHERE key = 'docx:k'",
            params![&b"tampered"[..]],
        )
        .unwrap();
        assert!(matches!(
            store.get_at("docx:k", Utc::now()),
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn builder_requires_a_path() {
        assert!(matches!(
            SqliteArtifactStore::builder().build(),
            Err(StoreError::MissingStore)
        ));
    }
}
