//! Class histogram → percentage shares, legend and map tiles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::AnalysisResult;
use crate::geo::{GeoService, Reducer, Reduction, VisParams};
use crate::imagery::ImageExpr;
use crate::models::classes::label_for_key;
use crate::models::{AnalysisKind, Boundary, LandClass, PALETTE};

use super::classification::ClassifiedImage;

/// Reduction scale of classification histograms, meters.
const HISTOGRAM_SCALE_M: f64 = 30.0;
const HISTOGRAM_TILE_SCALE: u32 = 4;

/// Pixel counts → percentages of the total. `None` when the histogram is
/// empty or counts nothing.
pub fn percentages<K: Clone + Ord>(histogram: &BTreeMap<K, f64>) -> Option<BTreeMap<K, f64>> {
    let total: f64 = histogram.values().sum();
    if histogram.is_empty() || total <= 0.0 {
        return None;
    }
    Some(
        histogram
            .iter()
            .map(|(k, count)| (k.clone(), count / total * 100.0))
            .collect(),
    )
}

/// Fold shares below `floor` into the rest.
///
/// Shares at or above `floor` are kept and the pooled remainder is split
/// equally between them, regardless of their size. When nothing reaches the
/// floor the shares are returned unchanged.
pub fn redistribute<K: Clone + Ord>(shares: &BTreeMap<K, f64>, floor: f64) -> BTreeMap<K, f64> {
    let mut keepers: BTreeMap<K, f64> = BTreeMap::new();
    let mut remnant = 0.0;
    for (k, pct) in shares {
        if *pct >= floor {
            keepers.insert(k.clone(), *pct);
        } else {
            remnant += pct;
        }
    }

    if keepers.is_empty() {
        return shares.clone();
    }

    let bonus = remnant / keepers.len() as f64;
    for pct in keepers.values_mut() {
        *pct += bonus;
    }
    keepers
}

/// Frequency histogram of a classification raster, keyed by class id.
/// `None` for an empty or all-zero result.
pub async fn class_histogram(
    geo: &dyn GeoService,
    classified: &ClassifiedImage,
    boundary: &Boundary,
) -> AnalysisResult<Option<BTreeMap<String, f64>>> {
    let reduction = Reduction::new(classified.image.clone(), Reducer::FrequencyHistogram, boundary)
        .scale(HISTOGRAM_SCALE_M)
        .tile_scale(HISTOGRAM_TILE_SCALE);
    let value = geo.reduce(reduction).await?;
    Ok(value
        .histogram()
        .filter(|h| h.values().sum::<f64>() > 0.0)
        .cloned())
}

/// Label of every class id, as shown for this classification.
pub fn label_mapping(has_transition: bool) -> BTreeMap<String, String> {
    LandClass::ALL
        .iter()
        .map(|c| (c.id().to_string(), c.label(has_transition).to_string()))
        .collect()
}

/// Legend color of every class label.
pub fn legend_colors(has_transition: bool) -> BTreeMap<String, String> {
    LandClass::ALL
        .iter()
        .map(|c| (c.label(has_transition).to_string(), c.color().to_string()))
        .collect()
}

/// Classification raster remapped onto palette positions `0..=12`.
pub fn palette_image(classified: &ImageExpr) -> ImageExpr {
    let (from, to) = LandClass::ALL
        .iter()
        .map(|c| (c.id() as f64, c.palette_index() as f64))
        .unzip();
    classified.remap(from, to)
}

pub fn palette_vis() -> VisParams {
    VisParams {
        min: 0.0,
        max: (PALETTE.len() - 1) as f64,
        palette: PALETTE.iter().map(|c| c.to_string()).collect(),
    }
}

/// Shares and rendering of one classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub year: i32,
    pub has_transition: bool,
    /// Class label → percent of the boundary, after redistribution.
    pub shares: BTreeMap<String, f64>,
    pub legend_colors: BTreeMap<String, String>,
    /// Class id → label.
    pub label_mapping: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClassificationOutcome {
    Summary(ClassificationSummary),
    /// Spring or summer imagery missing for the year.
    InsufficientData,
    /// The histogram came back empty.
    NoResult,
    /// Statistics came from radar; optical classification was not attempted.
    RadarMode,
}

/// Turns classification rasters into [`ClassificationSummary`]s.
pub struct HistogramSummarizer {
    geo: Arc<dyn GeoService>,
    significance_floor_pct: f64,
}

impl HistogramSummarizer {
    pub fn new(geo: Arc<dyn GeoService>, significance_floor_pct: f64) -> Self {
        Self {
            geo,
            significance_floor_pct,
        }
    }

    /// Reduce, redistribute and render `classified`.
    ///
    /// In product mode the map shows only the product class and the shares
    /// keep only its label. A failed tile request is logged and leaves
    /// `tile_url` empty.
    pub async fn summarize(
        &self,
        classified: &ClassifiedImage,
        boundary: &Boundary,
        kind: AnalysisKind,
        product_id: Option<&str>,
    ) -> AnalysisResult<ClassificationOutcome> {
        let Some(histogram) = class_histogram(self.geo.as_ref(), classified, boundary).await? else {
            return Ok(ClassificationOutcome::NoResult);
        };
        let Some(percent) = percentages(&histogram) else {
            return Ok(ClassificationOutcome::NoResult);
        };

        let has_transition = classified.has_transition;
        let mut shares: BTreeMap<String, f64> = BTreeMap::new();
        for (key, pct) in redistribute(&percent, self.significance_floor_pct) {
            *shares.entry(label_for_key(&key, has_transition)).or_insert(0.0) += pct;
        }

        let product = match (kind, product_id) {
            (AnalysisKind::Product, Some(id)) => {
                let class = LandClass::from_key(id);
                if class.is_none() {
                    log::warn!("Product id {} is not a known class", id);
                }
                class
            }
            _ => None,
        };

        let mut vis_image = palette_image(&classified.image);
        if let Some(class) = product {
            let target = class.palette_index() as f64;
            vis_image = vis_image.update_mask(vis_image.gte(target).and(vis_image.lte(target)));
            let name = class.label(has_transition);
            shares.retain(|label, _| label == name);
        }

        let tile_url = match self.geo.tile_url(&vis_image, &palette_vis()).await {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("Classification visualization failed: {}", e);
                None
            }
        };

        Ok(ClassificationOutcome::Summary(ClassificationSummary {
            year: classified.year,
            has_transition,
            shares,
            legend_colors: legend_colors(has_transition),
            label_mapping: label_mapping(has_transition),
            tile_url,
        }))
    }
}
