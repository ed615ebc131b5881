//! Statistics record produced by the aggregator and stored in the cache.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which sensor the numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    #[serde(rename = "S2")]
    Optical,
    #[serde(rename = "S1")]
    Radar,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::Optical => "S2",
            DataSource::Radar => "S1",
        }
    }
}

/// Decided statistics for one boundary and date window.
///
/// Exactly one sensor is the primary `source`. When optical is primary the
/// radar means may still be attached in `vv`/`vh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
    pub source: DataSource,
    #[serde(default)]
    pub band_means: BTreeMap<String, f64>,
    #[serde(default)]
    pub derived_indices: BTreeMap<String, f64>,
    #[serde(default)]
    pub past_ndvi: Option<f64>,
    #[serde(default)]
    pub ndvi_change: Option<f64>,
    #[serde(default)]
    pub soil_moisture: f64,
    #[serde(default)]
    pub vv: Option<f64>,
    #[serde(default)]
    pub vh: Option<f64>,
}

impl StatsResult {
    pub fn is_radar(&self) -> bool {
        self.source == DataSource::Radar
    }

    pub fn ndvi(&self) -> Option<f64> {
        self.derived_indices.get("NDVI").copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CandidateSide {
    Before,
    After,
}

/// A clear acquisition near the requested date, offered for disambiguation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateCandidate {
    pub label: CandidateSide,
    pub date: NaiveDate,
    pub cloud_pct: f64,
}
