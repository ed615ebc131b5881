//! Year-over-year change of woody cover (tall trees plus orchard/shrub).

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AnalysisSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo::GeoService;
use crate::models::{AnalysisMode, Boundary, DateWindow, LandClass};

use super::classification::ClassificationEngine;
use super::histogram::class_histogram;

/// Changes within ±0.5 percentage points read as stable.
pub const STABLE_BAND_PCT: f64 = 0.5;

const WOODY_CLASSES: [LandClass; 2] = [LandClass::Forest, LandClass::Orchard];
const NO_PERIODS: &str = "Insufficient data for both periods.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Increase,
    Decrease,
    Stable,
    Unknown,
}

impl Verdict {
    pub fn from_change(change_pct: Option<f64>) -> Self {
        match change_pct {
            Some(c) if c > STABLE_BAND_PCT => Verdict::Increase,
            Some(c) if c < -STABLE_BAND_PCT => Verdict::Decrease,
            Some(_) => Verdict::Stable,
            None => Verdict::Unknown,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Verdict::Increase => "Forest coverage has increased (Reforestation)",
            Verdict::Decrease => "Forest coverage has decreased (Deforestation)",
            Verdict::Stable => "No significant change in forest coverage",
            Verdict::Unknown => "Insufficient data for comparison",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub year_old: i32,
    pub year_new: i32,
    pub pct_old: Option<f64>,
    pub pct_new: Option<f64>,
    /// `pct_new - pct_old`, undefined unless both years classified.
    pub change_pct: Option<f64>,
    pub verdict: Verdict,
}

impl ChangeResult {
    /// Fails only when neither year produced a share.
    pub fn from_shares(
        (year_old, year_new): (i32, i32),
        pct_old: Option<f64>,
        pct_new: Option<f64>,
    ) -> AnalysisResult<Self> {
        if pct_old.is_none() && pct_new.is_none() {
            return Err(AnalysisError::SourceExhausted(NO_PERIODS.to_string()));
        }
        let change_pct = match (pct_old, pct_new) {
            (Some(old), Some(new)) => Some(new - old),
            _ => None,
        };
        Ok(Self {
            year_old,
            year_new,
            pct_old,
            pct_new,
            change_pct,
            verdict: Verdict::from_change(change_pct),
        })
    }
}

/// Older and newer year to compare, oldest first.
pub fn comparison_years(window: &DateWindow) -> (i32, i32) {
    let first = window.start.year();
    match (window.mode, window.end) {
        (AnalysisMode::Range, Some(end)) if end.year() != first => {
            let second = end.year();
            (first.min(second), first.max(second))
        }
        _ => (first - 1, first),
    }
}

/// Woody share of a class histogram, in percent.
pub fn woody_share(histogram: &BTreeMap<String, f64>) -> Option<f64> {
    let total: f64 = histogram.values().sum();
    if total <= 0.0 {
        return None;
    }
    let woody: f64 = histogram
        .iter()
        .filter(|(key, _)| LandClass::from_key(key).is_some_and(|c| WOODY_CLASSES.contains(&c)))
        .map(|(_, count)| count)
        .sum();
    Some(woody / total * 100.0)
}

pub struct ChangeDetector {
    geo: Arc<dyn GeoService>,
    engine: ClassificationEngine,
}

impl ChangeDetector {
    pub fn new(geo: Arc<dyn GeoService>, settings: AnalysisSettings) -> Self {
        Self {
            engine: ClassificationEngine::new(geo.clone(), settings),
            geo,
        }
    }

    /// Woody share of one year, `None` when the year cannot be classified.
    pub async fn woody_percentage(&self, year: i32, boundary: &Boundary) -> AnalysisResult<Option<f64>> {
        log::info!("Forest Analysis: Analyzing {}...", year);
        let Some(classified) = self.engine.build(year, boundary).await? else {
            return Ok(None);
        };
        let histogram = class_histogram(self.geo.as_ref(), &classified, boundary).await?;
        Ok(histogram.as_ref().and_then(woody_share))
    }

    pub async fn detect(&self, boundary: &Boundary, window: &DateWindow) -> AnalysisResult<ChangeResult> {
        let years = comparison_years(window);
        let pct_old = self.woody_percentage(years.0, boundary).await?;
        let pct_new = self.woody_percentage(years.1, boundary).await?;
        let result = ChangeResult::from_shares(years, pct_old, pct_new)?;
        log::info!(
            "Forest analysis complete: {} -> {} ({:?})",
            years.0,
            years.1,
            result.verdict
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{InMemoryGeoService, Scene};
    use crate::imagery::Pixel;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn field() -> Boundary {
        Boundary::polygon(vec![[32.0, 39.0], [32.01, 39.0], [32.01, 39.01], [32.0, 39.01]])
    }

    fn optical(b4: f64, b8: f64) -> Pixel {
        Pixel::from_pairs(&[
            ("B3", 500.0),
            ("B4", b4),
            ("B8", b8),
            ("B11", 1500.0),
            ("QA60", 0.0),
        ])
    }

    /// NDVI 0.6 in spring; summer NDVI 0.7 for trees, ~0.09 for harvested grain.
    fn season(geo: &InMemoryGeoService, year: i32, summer: Vec<Option<Pixel>>) {
        geo.add_scene(Scene::sentinel2(d(year, 4, 10), 5.0).uniform(optical(1000.0, 4000.0)));
        geo.add_scene(Scene::sentinel2(d(year, 7, 15), 5.0).with_pixels(summer));
        geo.add_scene(
            Scene::sentinel1(d(year, 7, 20)).uniform(Pixel::from_pairs(&[("VV", -8.0), ("VH", -12.0)])),
        );
    }

    fn detector() -> (Arc<InMemoryGeoService>, ChangeDetector) {
        let settings = AnalysisSettings::default();
        let geo = Arc::new(InMemoryGeoService::new(4));
        geo.add_asset(&settings.canopy_asset, &settings.canopy_band, vec![Some(45.0)]);
        let detector = ChangeDetector::new(geo.clone(), settings);
        (geo, detector)
    }

    #[test]
    fn test_year_selection() {
        let range = |a, b| DateWindow::range(a, b).unwrap();
        assert_eq!(comparison_years(&range(d(2021, 5, 1), d(2024, 6, 1))), (2021, 2024));
        assert_eq!(comparison_years(&range(d(2024, 5, 1), d(2024, 6, 1))), (2023, 2024));
        assert_eq!(comparison_years(&DateWindow::single(d(2024, 6, 1))), (2023, 2024));
    }

    #[test]
    fn test_shares_and_verdict() {
        let result = ChangeResult::from_shares((2023, 2024), Some(20.0), Some(15.0)).unwrap();
        assert_relative_eq!(result.change_pct.unwrap(), -5.0);
        assert_eq!(result.verdict, Verdict::Decrease);

        let result = ChangeResult::from_shares((2023, 2024), Some(20.0), Some(20.4)).unwrap();
        assert_eq!(result.verdict, Verdict::Stable);

        let result = ChangeResult::from_shares((2023, 2024), None, Some(12.0)).unwrap();
        assert_eq!(result.change_pct, None);
        assert_eq!(result.verdict, Verdict::Unknown);
        assert_eq!(result.verdict.description(), "Insufficient data for comparison");

        let err = ChangeResult::from_shares((2023, 2024), None, None).unwrap_err();
        assert_eq!(err.to_string(), "Insufficient data for both periods.");
    }

    #[test]
    fn test_woody_share_counts_trees_and_orchards() {
        let histogram: BTreeMap<String, f64> = [("4", 10.0), ("7", 10.0), ("2", 80.0)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        assert_relative_eq!(woody_share(&histogram).unwrap(), 20.0);
        assert_eq!(woody_share(&BTreeMap::new()), None);
    }

    #[test]
    fn test_woody_share_accepts_float_keys() {
        let histogram: BTreeMap<String, f64> = [("4.0", 30.0), ("7.0", 10.0), ("30.0", 60.0)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        assert_relative_eq!(woody_share(&histogram).unwrap(), 40.0);
    }

    #[tokio::test]
    async fn test_cleared_trees_read_as_decrease() {
        let (geo, detector) = detector();
        let trees = optical(600.0, 3400.0);
        let grain = optical(2000.0, 2400.0);
        season(&geo, 2023, vec![Some(trees.clone()); 4]);
        season(
            &geo,
            2024,
            vec![Some(trees.clone()), Some(trees), Some(grain.clone()), Some(grain)],
        );

        let result = detector
            .detect(&field(), &DateWindow::single(d(2024, 6, 1)))
            .await
            .unwrap();
        assert_eq!((result.year_old, result.year_new), (2023, 2024));
        assert_relative_eq!(result.pct_old.unwrap(), 100.0);
        assert_relative_eq!(result.pct_new.unwrap(), 50.0);
        assert_relative_eq!(result.change_pct.unwrap(), -50.0);
        assert_eq!(result.verdict, Verdict::Decrease);
        // per year: window sizes plus histogram
        assert_eq!(geo.round_trips(), 4);
    }

    #[tokio::test]
    async fn test_one_missing_year_leaves_change_undefined() {
        let (geo, detector) = detector();
        season(&geo, 2023, vec![Some(optical(600.0, 3400.0)); 4]);

        let result = detector
            .detect(&field(), &DateWindow::single(d(2024, 6, 1)))
            .await
            .unwrap();
        assert_relative_eq!(result.pct_old.unwrap(), 100.0);
        assert_eq!(result.pct_new, None);
        assert_eq!(result.verdict, Verdict::Unknown);
    }

    #[tokio::test]
    async fn test_no_imagery_in_either_year_fails() {
        let (_, detector) = detector();
        let err = detector
            .detect(&field(), &DateWindow::single(d(2024, 6, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::SourceExhausted(_)));
    }
}
