//! Album Catalog
//!
//! The authoritative record collection behind the album RPC service.
//!
//! A [`CatalogStore`] owns the in-memory sequence of [`Record`]s and writes
//! every mutation through to a [`Repository`]. The store is shared by all
//! in-flight calls, so it serializes the duplicate check, append and persist
//! sequence behind a single writer lock while lookups proceed concurrently.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use album_catalog::{AppendOutcome, CatalogStore, JsonFileRepository, Record};
//!
//! let repository = Arc::new(JsonFileRepository::new("db/album.json"));
//! let store = CatalogStore::open(repository).await?;
//!
//! let outcome = store
//!     .append_if_absent(Record::new("Jeru", "Gerry Mulligan", 17.99))
//!     .await?;
//! assert_eq!(outcome, AppendOutcome::AlreadyExists);
//! ```

mod record;
mod repository;
mod store;

pub use record::Record;
pub use repository::{InMemoryRepository, JsonFileRepository, Repository, RepositoryError};
pub use store::{AppendOutcome, CatalogError, CatalogStore};
