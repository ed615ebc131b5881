//! In-memory cache repository.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::models::CacheEntry;
use crate::db::repository::{CacheRepository, RepositoryResult};

/// Cache entries held in a process-local map.
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct LocalCacheRepository {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl LocalCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[async_trait]
impl CacheRepository for LocalCacheRepository {
    async fn fetch(&self, key: &str) -> RepositoryResult<Option<CacheEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn upsert(&self, entry: CacheEntry) -> RepositoryResult<()> {
        self.entries.write().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> RepositoryResult<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.timestamp >= cutoff);
        Ok(before - entries.len())
    }

    async fn count(&self) -> RepositoryResult<usize> {
        Ok(self.entries.read().len())
    }

    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(true)
    }
}
