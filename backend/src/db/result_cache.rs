//! Lenient read-through cache of statistics results.
//!
//! Reads never check entry age; only [`ResultCache::clear_old`] removes
//! entries. Storage failures and undecodable payloads are logged and treated
//! as a miss, and write failures are logged and dropped, so the cache can
//! never fail an analysis.

use chrono::{Duration, Utc};
use std::sync::Arc;

use super::checksum::request_fingerprint;
use super::models::CacheEntry;
use super::repository::CacheRepository;
use crate::models::{AnalysisRequest, StatsResult};

#[derive(Clone)]
pub struct ResultCache {
    repo: Arc<dyn CacheRepository>,
}

impl ResultCache {
    pub fn new(repo: Arc<dyn CacheRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn CacheRepository> {
        &self.repo
    }

    /// Fingerprint of a request: boundary, window bounds, mode and kind.
    pub fn key_for(request: &AnalysisRequest) -> String {
        request_fingerprint(
            &request.boundary,
            request.window.start,
            request.window.end,
            request.window.mode,
            request.kind,
        )
    }

    pub async fn get(&self, key: &str) -> Option<StatsResult> {
        let entry = match self.repo.fetch(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str::<StatsResult>(&entry.data) {
            Ok(stats) => {
                log::debug!("Cache hit for {}", key);
                Some(stats)
            }
            Err(e) => {
                log::warn!("Discarding malformed cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, stats: &StatsResult) {
        let data = match serde_json::to_string(stats) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Could not serialize stats for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.repo.upsert(CacheEntry::new(key, data)).await {
            log::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// Remove entries written more than `days` days ago. Returns how many
    /// were removed; storage failures count as zero.
    /// A horizon reaching past the earliest representable time prunes nothing.
    pub async fn clear_old(&self, days: i64) -> usize {
        let cutoff = Duration::try_days(days)
            .and_then(|age| Utc::now().naive_utc().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            log::warn!("Cache pruning horizon of {} days is out of range, nothing pruned", days);
            return 0;
        };
        match self.repo.delete_older_than(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    log::info!("Pruned {} cache entries older than {} days", removed, days);
                }
                removed
            }
            Err(e) => {
                log::warn!("Cache pruning failed: {}", e);
                0
            }
        }
    }
}
