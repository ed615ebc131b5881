//! Request and response shapes of the geospatial service.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::imagery::ImageExpr;
use crate::models::Boundary;

/// Regional reducer applied over every unmasked pixel inside a boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reducer {
    /// Unmasked pixel count per band.
    Count,
    /// Mean per band.
    Mean,
    /// Pixel count per distinct value of the first band.
    FrequencyHistogram,
    /// Means of `value_bands` grouped by the integer value of `group_band`.
    GroupedMean {
        group_band: String,
        value_bands: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reduction {
    pub image: ImageExpr,
    pub reducer: Reducer,
    pub boundary: Boundary,
    pub scale_m: f64,
    pub max_pixels: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_scale: Option<u32>,
    #[serde(default)]
    pub best_effort: bool,
}

impl Reduction {
    /// 10 m resolution, up to 1e9 pixels.
    pub fn new(image: ImageExpr, reducer: Reducer, boundary: &Boundary) -> Self {
        Self {
            image,
            reducer,
            boundary: boundary.clone(),
            scale_m: 10.0,
            max_pixels: 1_000_000_000,
            tile_scale: None,
            best_effort: false,
        }
    }

    pub fn scale(mut self, scale_m: f64) -> Self {
        self.scale_m = scale_m;
        self
    }

    pub fn tile_scale(mut self, tile_scale: u32) -> Self {
        self.tile_scale = Some(tile_scale);
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Named reductions sent together in a single round trip.
pub type ReductionBatch = BTreeMap<String, Reduction>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMean {
    pub class: i64,
    /// One entry per value band, `None` when no pixel carried the band.
    pub means: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ReductionValue {
    Bands(BTreeMap<String, Option<f64>>),
    Histogram(BTreeMap<String, f64>),
    Groups(Vec<GroupMean>),
    Null,
}

impl ReductionValue {
    pub fn band(&self, name: &str) -> Option<f64> {
        match self {
            ReductionValue::Bands(bands) => bands.get(name).copied().flatten(),
            _ => None,
        }
    }

    /// First non-null band value, whatever its name.
    pub fn first_band(&self) -> Option<f64> {
        match self {
            ReductionValue::Bands(bands) => bands.values().find_map(|v| *v),
            _ => None,
        }
    }

    /// All non-null band values.
    pub fn bands(&self) -> BTreeMap<String, f64> {
        match self {
            ReductionValue::Bands(bands) => bands
                .iter()
                .filter_map(|(k, v)| v.map(|v| (k.clone(), v)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    pub fn histogram(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            ReductionValue::Histogram(h) => Some(h),
            _ => None,
        }
    }

    pub fn groups(&self) -> &[GroupMean] {
        match self {
            ReductionValue::Groups(groups) => groups,
            _ => &[],
        }
    }
}

/// Metadata of one image in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub date: NaiveDate,
    pub time_start_ms: i64,
    #[serde(default)]
    pub cloud_pct: Option<f64>,
}

/// One per-image result of a mapped reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReduction {
    pub date: NaiveDate,
    pub value: ReductionValue,
}

/// Visualization parameters for tile URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub min: f64,
    pub max: f64,
    pub palette: Vec<String>,
}
