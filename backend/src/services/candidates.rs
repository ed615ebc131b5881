//! Nearest clear acquisitions around a requested date.

use chrono::NaiveDate;
use std::sync::Arc;

use crate::geo::{GeoResult, GeoService, ImageInfo};
use crate::imagery::{CollectionQuery, SortOrder};
use crate::models::{shift_days, Boundary, CandidateSide, DateCandidate};

/// Days searched on each side of the center date.
pub const SEARCH_SPAN_DAYS: i64 = 60;
pub const BEFORE_MAX_CLOUD: f64 = 30.0;
pub const AFTER_MAX_CLOUD: f64 = 40.0;
pub const EXACT_MAX_CLOUD: f64 = 30.0;

pub struct CandidateSearch {
    geo: Arc<dyn GeoService>,
}

impl CandidateSearch {
    pub fn new(geo: Arc<dyn GeoService>) -> Self {
        Self { geo }
    }

    /// A clear (< 30 % cloud) image acquired on `date` itself.
    ///
    /// Service failures are logged and read as "no match".
    pub async fn find_exact_match(&self, boundary: &Boundary, date: NaiveDate) -> Option<ImageInfo> {
        let query = CollectionQuery::sentinel2_day(boundary, date).max_cloud(EXACT_MAX_CLOUD);
        match self.geo.first_image(&query).await {
            Ok(info) => info,
            Err(e) => {
                log::warn!("Exact-date search failed for {}: {}", date, e);
                None
            }
        }
    }

    /// Closest image before `center` (< 30 % cloud) and closest image from
    /// `center` onwards (< 40 % cloud), at most one each.
    ///
    /// An empty list means nothing usable within 60 days. Service failures
    /// are logged and also give an empty list.
    pub async fn find_candidates(&self, boundary: &Boundary, center: NaiveDate) -> Vec<DateCandidate> {
        match self.search(boundary, center).await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("Candidate date search failed around {}: {}", center, e);
                Vec::new()
            }
        }
    }

    async fn search(&self, boundary: &Boundary, center: NaiveDate) -> GeoResult<Vec<DateCandidate>> {
        // Near the calendar limits the search clips to what chrono can represent.
        let from = shift_days(center, -SEARCH_SPAN_DAYS).unwrap_or(NaiveDate::MIN);
        let until = shift_days(center, SEARCH_SPAN_DAYS).unwrap_or(NaiveDate::MAX);
        let before = CollectionQuery::sentinel2(boundary, from, center)
            .max_cloud(BEFORE_MAX_CLOUD)
            .sorted(SortOrder::Descending);
        let after = CollectionQuery::sentinel2(boundary, center, until)
            .max_cloud(AFTER_MAX_CLOUD)
            .sorted(SortOrder::Ascending);

        let mut candidates = Vec::with_capacity(2);
        if let Some(info) = self.geo.first_image(&before).await? {
            candidates.push(candidate(CandidateSide::Before, info));
        }
        if let Some(info) = self.geo.first_image(&after).await? {
            candidates.push(candidate(CandidateSide::After, info));
        }
        Ok(candidates)
    }
}

fn candidate(label: CandidateSide, info: ImageInfo) -> DateCandidate {
    DateCandidate {
        label,
        date: info.date,
        cloud_pct: info.cloud_pct.unwrap_or(0.0),
    }
}
