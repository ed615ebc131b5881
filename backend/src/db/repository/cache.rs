//! Cache repository trait.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::error::RepositoryResult;
use crate::db::models::CacheEntry;

/// Storage for fingerprinted statistics payloads.
///
/// Writes are insert-or-replace by key: the last writer wins and entries are
/// never versioned. Nothing is removed on read.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Look up an entry by key.
    ///
    /// # Returns
    /// * `Ok(Some(entry))` - Entry found, regardless of its age
    /// * `Ok(None)` - No entry for this key
    /// * `Err(RepositoryError)` - Storage failure
    async fn fetch(&self, key: &str) -> RepositoryResult<Option<CacheEntry>>;

    /// Insert an entry, replacing any previous entry with the same key.
    async fn upsert(&self, entry: CacheEntry) -> RepositoryResult<()>;

    /// Delete every entry written strictly before `cutoff`.
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of entries removed
    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> RepositoryResult<usize>;

    async fn count(&self) -> RepositoryResult<usize>;

    /// Check that the backing store is reachable.
    async fn health_check(&self) -> RepositoryResult<bool>;
}
