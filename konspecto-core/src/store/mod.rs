//! Key/value persistence for generated artifacts, with per-key expiry.

mod memory;
mod sqlite;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryArtifactStore;
pub use sqlite::{SqliteArtifactStore, SqliteArtifactStoreBuilder, StoredArtifact};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open artifact database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on artifact database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("artifact store path not configured")]
    MissingStore,
    #[error("retention {0:?} is not a usable expiry")]
    InvalidTtl(Duration),
    #[error("stored artifact {key} failed its checksum")]
    Corrupted { key: String },
    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(error: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Expired keys behave exactly like keys that were never written.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns `Ok(true)` only once the bytes are durably stored.
    async fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Drops expired entries and returns how many were removed.
    async fn purge_expired(&self) -> StoreResult<usize>;
}
