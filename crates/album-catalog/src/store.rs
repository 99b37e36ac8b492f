//! The shared in-memory record collection.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::record::Record;
use crate::repository::{Repository, RepositoryError};

/// Errors surfaced by the catalog store.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The initial record set could not be loaded
    #[error("failed to load catalog: {0}")]
    Load(#[source] RepositoryError),
    /// A mutation was applied in memory but could not be persisted
    #[error("failed to persist catalog: {0}")]
    Persist(#[source] RepositoryError),
}

/// Result of [`CatalogStore::append_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was appended and persisted.
    Appended,
    /// A record with the same title was already present; nothing changed.
    AlreadyExists,
}

/// Ordered, append-only record collection with write-through persistence.
///
/// Lookups take a shared read lock. Appends hold the write lock across the
/// duplicate check, the push and the repository write, so concurrent uploads
/// of the same title cannot both pass the check and readers never observe a
/// record whose persist is still in flight.
///
/// A persist failure does not roll the append back: the in-memory view stays
/// ahead of disk until the next successful persist rewrites the full set.
#[derive(Debug)]
pub struct CatalogStore {
    records: RwLock<Vec<Record>>,
    repository: Arc<dyn Repository>,
}

impl CatalogStore {
    /// Load the initial record set from `repository`.
    pub async fn open(repository: Arc<dyn Repository>) -> Result<Self, CatalogError> {
        let records = repository.load().await.map_err(CatalogError::Load)?;
        tracing::info!(count = records.len(), "catalog loaded");
        Ok(Self::with_records(records, repository))
    }

    /// Create a store from an already loaded record set.
    pub fn with_records(records: Vec<Record>, repository: Arc<dyn Repository>) -> Self {
        Self {
            records: RwLock::new(records),
            repository,
        }
    }

    /// First record whose title matches exactly.
    pub async fn find_by_title(&self, title: &str) -> Option<Record> {
        let records = self.records.read().await;
        records.iter().find(|r| r.title == title).cloned()
    }

    /// All records by `artist`, in store order.
    pub async fn find_all_by_artist(&self, artist: &str) -> Vec<Record> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| r.artist == artist)
            .cloned()
            .collect()
    }

    /// Whether a record with `title` exists.
    pub async fn contains_title(&self, title: &str) -> bool {
        let records = self.records.read().await;
        records.iter().any(|r| r.title == title)
    }

    /// Append `record` unconditionally and persist the full sequence.
    ///
    /// Callers that need title uniqueness should use
    /// [`append_if_absent`](Self::append_if_absent) instead.
    pub async fn append(&self, record: Record) -> Result<(), CatalogError> {
        let mut records = self.records.write().await;
        records.push(record);
        self.repository
            .persist(&records)
            .await
            .map_err(CatalogError::Persist)
    }

    /// Append `record` unless its title is already present.
    ///
    /// The check, the append and the persist run under one write lock.
    pub async fn append_if_absent(&self, record: Record) -> Result<AppendOutcome, CatalogError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.title == record.title) {
            tracing::debug!(title = %record.title, "duplicate title, skipping append");
            return Ok(AppendOutcome::AlreadyExists);
        }

        tracing::debug!(title = %record.title, "appending record");
        records.push(record);
        if let Err(e) = self.repository.persist(&records).await {
            tracing::warn!(count = records.len(), error = %e, "persist failed after append");
            return Err(CatalogError::Persist(e));
        }
        Ok(AppendOutcome::Appended)
    }

    /// The full current sequence.
    pub async fn snapshot(&self) -> Vec<Record> {
        self.records.read().await.clone()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
