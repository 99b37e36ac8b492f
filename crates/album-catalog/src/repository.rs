//! Durable load/persist of the record collection.
//!
//! The store only ever needs two things from its backing storage: the initial
//! record set at startup, and a way to replace the persisted set after every
//! mutation. [`JsonFileRepository`] is the default; [`InMemoryRepository`]
//! keeps everything in memory and supports fault injection for tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::record::Record;

/// Errors that can occur while loading or persisting records.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The persisted data could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backing storage refused the operation
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Backing storage for the catalog.
///
/// `persist` always receives the full record sequence and replaces whatever
/// was stored before; implementations never append.
#[async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Load the initial record set.
    async fn load(&self) -> Result<Vec<Record>, RepositoryError>;

    /// Replace the persisted record set with `records`.
    async fn persist(&self, records: &[Record]) -> Result<(), RepositoryError>;
}

/// Repository backed by a pretty-printed JSON array on disk.
///
/// Writes go to a sibling `.tmp` file which is synced and then renamed over
/// the target, so readers never see a half-written catalog.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    /// Create a repository for the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Repository for JsonFileRepository {
    async fn load(&self) -> Result<Vec<Record>, RepositoryError> {
        let data = tokio::fs::read(&self.path).await?;
        let records: Vec<Record> = serde_json::from_slice(&data)?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "loaded records");
        Ok(records)
    }

    async fn persist(&self, records: &[Record]) -> Result<(), RepositoryError> {
        let data = serde_json::to_vec_pretty(records)?;
        let temp_path = self.temp_path();

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "persisted records");
        Ok(())
    }
}

/// Repository that keeps the persisted set in memory.
///
/// Persist and load failures can be switched on to exercise the error paths
/// of the store and the RPC layer.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: Mutex<Vec<Record>>,
    fail_load: AtomicBool,
    fail_persist: AtomicBool,
    persist_count: AtomicUsize,
}

impl InMemoryRepository {
    /// Create a repository whose initial load yields `records`.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make subsequent loads fail (or succeed again).
    pub fn fail_loads(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent persists fail (or succeed again).
    pub fn fail_persists(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Number of successful persists so far.
    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }

    /// The most recently persisted record set.
    pub async fn persisted(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load(&self) -> Result<Vec<Record>, RepositoryError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("load disabled".to_string()));
        }
        Ok(self.records.lock().await.clone())
    }

    async fn persist(&self, records: &[Record]) -> Result<(), RepositoryError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("persist disabled".to_string()));
        }
        *self.records.lock().await = records.to_vec();
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
