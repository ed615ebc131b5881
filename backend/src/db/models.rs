//! Rows stored by cache repositories.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One cached statistics payload.
///
/// Created on the first successful aggregation for a fingerprint and
/// overwritten on recompute. Removed only by an age-based sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// JSON-serialized statistics record.
    pub data: String,
    /// UTC write time.
    pub timestamp: NaiveDateTime,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            timestamp: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}
