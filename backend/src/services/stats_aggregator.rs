//! Statistics for one boundary and date window.
//!
//! Flow of [`StatsAggregator::aggregate`]:
//!
//! ```text
//! license gate ─▶ cache ──hit──▶ Computed { cached: true }
//!                   │ miss
//!                   ▼
//!            resolve target composite ──no date──▶ NeedsDateSelection
//!                   │
//!                   ▼
//!            one batched reduction (coverage, optical, trailing optical,
//!                   │                radar, soil moisture)
//!                   ▼
//!            source decision ─▶ credit ─▶ cache write ─▶ Computed
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AnalysisSettings;
use crate::db::ResultCache;
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo::{GeoService, Reducer, Reduction, ReductionBatch, ReductionValue};
use crate::imagery::indices::ndvi;
use crate::imagery::{derive_indices, CompositeBuilder, ImageExpr};
use crate::models::{
    shift_days, AnalysisMode, AnalysisRequest, DataSource, DateCandidate, StatsResult,
};

use super::candidates::CandidateSearch;
use super::licensing::LicenseGate;
use super::soil_moisture::soil_moisture_image;

/// Trailing comparison window, days before the anchor date.
const PAST_WINDOW_DAYS: (i64, i64) = (45, 15);
/// Radar means are taken over ±15 days.
const RADAR_HALF_WINDOW_DAYS: i64 = 15;

const NO_IMAGES: &str = "No suitable images found.";
const NO_DATA: &str = "No Optical or Radar data available.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatsOutcome {
    /// `cached` results were not recomputed; callers decide themselves
    /// whether to chain classification.
    Computed { stats: StatsResult, cached: bool },
    /// Single-date request without a clear image on the day.
    NeedsDateSelection { candidates: Vec<DateCandidate> },
}

enum Target {
    Image(ImageExpr),
    Ambiguous(Vec<DateCandidate>),
}

pub struct StatsAggregator {
    geo: Arc<dyn GeoService>,
    cache: ResultCache,
    license: Arc<dyn LicenseGate>,
    candidates: CandidateSearch,
    settings: AnalysisSettings,
}

impl StatsAggregator {
    pub fn new(
        geo: Arc<dyn GeoService>,
        cache: ResultCache,
        license: Arc<dyn LicenseGate>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            candidates: CandidateSearch::new(geo.clone()),
            geo,
            cache,
            license,
            settings,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Compute (or recall) statistics for `request`.
    ///
    /// `cancel` is checked after the target composite is resolved and again
    /// once the reduction returns; a cancelled run neither consumes a credit
    /// nor writes the cache.
    pub async fn aggregate(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> AnalysisResult<StatsOutcome> {
        request.boundary.validate()?;
        request.window.validate()?;

        let access = self.license.check_access().await;
        if !access.allowed {
            return Err(AnalysisError::AccessDenied(format!(
                "{}\nUser ID: {}",
                access.message,
                self.license.user_id()
            )));
        }
        log::info!("License approved: {}", access.message);

        let key = ResultCache::key_for(request);
        if let Some(stats) = self.cache.get(&key).await {
            log::info!("Statistics loaded from cache");
            return Ok(StatsOutcome::Computed {
                stats,
                cached: true,
            });
        }

        let target = match self.resolve_target(request).await? {
            Target::Image(image) => image,
            Target::Ambiguous(candidates) => {
                return Ok(StatsOutcome::NeedsDateSelection { candidates })
            }
        };

        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let batch = self.reduction_batch(request, &target)?;
        let results = self.geo.reduce_batch(&batch).await?;
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let stats = decide_source(&results, self.settings.coverage_floor)?;
        log::info!("Statistics computed from {}", stats.source.as_str());

        self.license.decrement_credit().await;
        self.cache.set(&key, &stats).await;
        Ok(StatsOutcome::Computed {
            stats,
            cached: false,
        })
    }

    async fn resolve_target(&self, request: &AnalysisRequest) -> AnalysisResult<Target> {
        let composites = CompositeBuilder::new(&request.boundary);
        let window = &request.window;

        if window.mode == AnalysisMode::Range {
            let end = window.end.unwrap_or(window.start);
            return Ok(Target::Image(composites.optical(
                window.start,
                end,
                self.settings.optical_cloud_pct,
            )));
        }

        let specific = match window.specific {
            Some(day) => Some(day),
            None => self
                .candidates
                .find_exact_match(&request.boundary, window.start)
                .await
                .map(|info| {
                    log::info!("Exact clear image found: {}", info.date);
                    info.date
                }),
        };
        if let Some(day) = specific {
            return Ok(Target::Image(composites.optical_on(day)));
        }

        let candidates = self
            .candidates
            .find_candidates(&request.boundary, window.start)
            .await;
        if candidates.is_empty() {
            return Err(AnalysisError::ImageUnavailable(NO_IMAGES.to_string()));
        }
        Ok(Target::Ambiguous(candidates))
    }

    fn reduction_batch(
        &self,
        request: &AnalysisRequest,
        target: &ImageExpr,
    ) -> AnalysisResult<ReductionBatch> {
        let boundary = &request.boundary;
        let anchor = request.window.start;
        let composites = CompositeBuilder::new(boundary);
        let days = |offset: i64| shift_days(anchor, offset);

        let mut bands: Vec<&str> = request.bands.iter().map(String::as_str).collect();
        for required in ["B4", "B8"] {
            if !bands.contains(&required) {
                bands.push(required);
            }
        }

        let past = composites.optical(
            days(-PAST_WINDOW_DAYS.0)?,
            days(-PAST_WINDOW_DAYS.1)?,
            self.settings.optical_cloud_pct,
        );
        let radar = composites.radar(
            days(-RADAR_HALF_WINDOW_DAYS)?,
            days(RADAR_HALF_WINDOW_DAYS)?,
            &["VV", "VH"],
        );

        let reduction = |image: ImageExpr, reducer: Reducer| Reduction::new(image, reducer, boundary);
        let mut batch = ReductionBatch::new();
        batch.insert(
            "total_pixels".into(),
            reduction(ImageExpr::constant(1.0), Reducer::Count),
        );
        batch.insert(
            "valid_pixels".into(),
            reduction(target.select(&["B4"]), Reducer::Count),
        );
        batch.insert(
            "optical_stats".into(),
            reduction(target.select(&bands), Reducer::Mean),
        );
        batch.insert(
            "past_stats".into(),
            reduction(past.select(&["B4", "B8"]), Reducer::Mean),
        );
        batch.insert(
            "s1_stats".into(),
            reduction(radar.select(&["VV", "VH"]), Reducer::Mean),
        );
        batch.insert(
            "smi".into(),
            reduction(soil_moisture_image(boundary, anchor)?, Reducer::Mean),
        );
        Ok(batch)
    }
}

/// Optical coverage gate: valid over total pixel count.
pub fn check_coverage(valid: f64, total: f64, floor: f64) -> AnalysisResult<f64> {
    let total = if total > 0.0 { total } else { 1.0 };
    let ratio = valid / total;
    if ratio < floor {
        return Err(AnalysisError::InsufficientCoverage { ratio, floor });
    }
    Ok(ratio)
}

/// Pick the primary source from the batched reduction results.
///
/// Optical wins when coverage reaches `floor` and a red-band mean exists;
/// radar means are then attached. Otherwise radar becomes primary if VH was
/// observed. Neither usable is a [`AnalysisError::SourceExhausted`].
pub fn decide_source(
    results: &BTreeMap<String, ReductionValue>,
    floor: f64,
) -> AnalysisResult<StatsResult> {
    let band = |name: &str, b: &str| results.get(name).and_then(|v| v.band(b));
    let total = band("total_pixels", "constant").unwrap_or(1.0);
    let valid = band("valid_pixels", "B4").unwrap_or(0.0);

    let mut stats = match check_coverage(valid, total, floor) {
        Err(e) => {
            log::info!("{}, switching to radar", e);
            None
        }
        Ok(_) => results
            .get("optical_stats")
            .map(ReductionValue::bands)
            .filter(|means| means.contains_key("B4"))
            .map(|means| optical_stats(means, band("past_stats", "B4"), band("past_stats", "B8"))),
    };

    match (band("s1_stats", "VH"), stats.as_mut()) {
        (Some(vh), Some(optical)) => {
            optical.vh = Some(vh);
            optical.vv = band("s1_stats", "VV");
        }
        (Some(vh), None) => {
            let vv = band("s1_stats", "VV");
            let mut means = BTreeMap::new();
            means.insert("VH".to_string(), vh);
            if let Some(vv) = vv {
                means.insert("VV".to_string(), vv);
            }
            stats = Some(StatsResult {
                source: DataSource::Radar,
                band_means: means,
                derived_indices: BTreeMap::new(),
                past_ndvi: None,
                ndvi_change: None,
                soil_moisture: 0.0,
                vv,
                vh: Some(vh),
            });
        }
        (None, Some(_)) => {}
        (None, None) => return Err(AnalysisError::SourceExhausted(NO_DATA.to_string())),
    }

    let mut stats = stats.ok_or_else(|| AnalysisError::SourceExhausted(NO_DATA.to_string()))?;
    stats.soil_moisture = results
        .get("smi")
        .and_then(ReductionValue::first_band)
        .unwrap_or(0.0);
    Ok(stats)
}

fn optical_stats(means: BTreeMap<String, f64>, past_b4: Option<f64>, past_b8: Option<f64>) -> StatsResult {
    let (past_ndvi, ndvi_change) = match (past_b4, past_b8) {
        (Some(b4), Some(b8)) => {
            let past = ndvi(b8, b4);
            let current = ndvi(
                means.get("B8").copied().unwrap_or(0.0),
                means.get("B4").copied().unwrap_or(0.0),
            );
            (Some(past), Some(current - past))
        }
        _ => (None, None),
    };

    StatsResult {
        source: DataSource::Optical,
        derived_indices: derive_indices(&means),
        band_means: means,
        past_ndvi,
        ndvi_change,
        soil_moisture: 0.0,
        vv: None,
        vh: None,
    }
}

#[cfg(test)]
#[path = "stats_aggregator_tests.rs"]
mod tests;
