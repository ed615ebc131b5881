//! Per-class spectral index series over a date range.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AnalysisSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo::{GeoService, Reducer, Reduction};
use crate::imagery::{CollectionQuery, ImageExpr, SpectralIndex};
use crate::models::classes::label_for_key;
use crate::models::Boundary;

use super::classification::{ClassifiedImage, CLASS_BAND};

/// Sentinel-2 L2A digital numbers per unit reflectance.
const REFLECTANCE_SCALE: f64 = 10_000.0;
const SINGLE_DATE_SPAN_MONTHS: u32 = 2;

/// Dates and index values of one class. Every index vector is parallel to
/// `dates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassTrend {
    pub dates: Vec<NaiveDate>,
    #[serde(flatten)]
    pub indices: BTreeMap<String, Vec<f64>>,
}

impl ClassTrend {
    fn push(&mut self, date: NaiveDate, means: &[Option<f64>]) {
        self.dates.push(date);
        for (i, index) in SpectralIndex::TREND.iter().enumerate() {
            let value = means.get(i).copied().flatten().unwrap_or(0.0);
            self.indices
                .entry(index.name().to_string())
                .or_default()
                .push(value);
        }
    }

    pub fn series(&self, index: &str) -> &[f64] {
        self.indices.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Class label → series.
pub type TrendSeries = BTreeMap<String, ClassTrend>;

/// Parse `dd.mm.yyyy` or ISO `yyyy-mm-dd`.
pub fn parse_trend_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
}

/// Resolve the `[start, end)` window of a trend request. A lone date expands
/// to two months either side.
pub fn trend_window(start: &str, end: Option<&str>) -> AnalysisResult<(NaiveDate, NaiveDate)> {
    let parse = |text: &str| {
        parse_trend_date(text)
            .ok_or_else(|| AnalysisError::InvalidRequest(format!("unreadable date '{}'", text)))
    };
    let start = parse(start)?;
    match end.filter(|e| !e.trim().is_empty()) {
        Some(end) => {
            let end = parse(end)?;
            if end < start {
                return Err(AnalysisError::InvalidRequest(
                    "trend end date precedes start date".to_string(),
                ));
            }
            Ok((start, end))
        }
        None => {
            let span = Months::new(SINGLE_DATE_SPAN_MONTHS);
            match (start.checked_sub_months(span), start.checked_add_months(span)) {
                (Some(from), Some(to)) => Ok((from, to)),
                _ => Err(AnalysisError::InvalidRequest(format!(
                    "date {} out of range",
                    start
                ))),
            }
        }
    }
}

/// Trend index rasters of the mapped image plus the classification band.
fn trend_stack(classified: &ImageExpr) -> ImageExpr {
    let reflectance = ImageExpr::Current.divide(REFLECTANCE_SCALE);
    let mut layers: Vec<ImageExpr> = SpectralIndex::TREND
        .iter()
        .map(|index| index.expr(&reflectance))
        .collect();
    layers.push(classified.clone());
    ImageExpr::stack(layers)
}

pub struct TimeSeriesExtractor {
    geo: Arc<dyn GeoService>,
    settings: AnalysisSettings,
}

impl TimeSeriesExtractor {
    pub fn new(geo: Arc<dyn GeoService>, settings: AnalysisSettings) -> Self {
        Self { geo, settings }
    }

    /// Grouped index means per image of the cloud-filtered collection.
    ///
    /// A class only gets an entry on the dates its group was returned; index
    /// means the service reports as null are recorded as 0.
    pub async fn extract(
        &self,
        classified: &ClassifiedImage,
        boundary: &Boundary,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AnalysisResult<TrendSeries> {
        let query = CollectionQuery::sentinel2(boundary, start, end)
            .max_cloud(self.settings.trend_cloud_pct);
        let reduction = Reduction::new(
            trend_stack(&classified.image),
            Reducer::GroupedMean {
                group_band: CLASS_BAND.to_string(),
                value_bands: SpectralIndex::TREND
                    .iter()
                    .map(|i| i.name().to_string())
                    .collect(),
            },
            boundary,
        )
        .scale(10.0)
        .best_effort();

        let per_image = self.geo.map_reduce(&query, &reduction).await?;
        log::info!(
            "Trend series over {} images ({} .. {})",
            per_image.len(),
            start,
            end
        );

        let mut series = TrendSeries::new();
        for image in per_image {
            for group in image.value.groups() {
                if group.means.is_empty() {
                    continue;
                }
                let label = label_for_key(&group.class.to_string(), classified.has_transition);
                series
                    .entry(label)
                    .or_default()
                    .push(image.date, &group.means);
            }
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{InMemoryGeoService, Scene};
    use crate::imagery::cloud_mask::CLOUD_BIT;
    use crate::imagery::Pixel;
    use approx::assert_relative_eq;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn field() -> Boundary {
        Boundary::polygon(vec![[32.0, 39.0], [32.01, 39.0], [32.01, 39.01], [32.0, 39.01]])
    }

    fn reflectance(b4: f64, b8: f64, qa: f64) -> Pixel {
        Pixel::from_pairs(&[
            ("B2", 500.0),
            ("B3", 800.0),
            ("B4", b4),
            ("B5", 1200.0),
            ("B6", 2000.0),
            ("B8", b8),
            ("B11", 1500.0),
            ("QA60", qa),
        ])
    }

    fn classified(geo: &InMemoryGeoService, classes: Vec<Option<f64>>) -> ClassifiedImage {
        geo.add_asset("classes", CLASS_BAND, classes);
        ClassifiedImage {
            year: 2024,
            image: ImageExpr::asset("classes", CLASS_BAND),
            has_transition: false,
        }
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(parse_trend_date("15.06.2024"), Some(d("2024-06-15")));
        assert_eq!(parse_trend_date("2024-06-15"), Some(d("2024-06-15")));
        assert_eq!(parse_trend_date("06/15/2024"), None);
    }

    #[test]
    fn test_single_date_expands_two_months() {
        let (start, end) = trend_window("15.06.2024", None).unwrap();
        assert_eq!(start, d("2024-04-15"));
        assert_eq!(end, d("2024-08-15"));

        let (start, end) = trend_window("01.05.2024", Some("2024-07-01")).unwrap();
        assert_eq!((start, end), (d("2024-05-01"), d("2024-07-01")));

        assert!(trend_window("01.07.2024", Some("01.05.2024")).is_err());
        assert!(trend_window("yesterday", None).is_err());
    }

    #[tokio::test]
    async fn test_series_is_sparse_per_class() {
        let geo = Arc::new(InMemoryGeoService::new(2));
        // pixel 0 is wheat, pixel 1 is water
        let classified = classified(&geo, vec![Some(2.0), Some(5.0)]);

        geo.add_scene(Scene::sentinel2(d("2024-06-05"), 10.0).uniform(reflectance(1000.0, 3000.0, 0.0)));
        // water pixel under cloud on the second date
        geo.add_scene(Scene::sentinel2(d("2024-06-10"), 20.0).with_pixels(vec![
            Some(reflectance(2000.0, 3000.0, 0.0)),
            Some(reflectance(2000.0, 3000.0, CLOUD_BIT as f64)),
        ]));
        // above the cloud threshold
        geo.add_scene(Scene::sentinel2(d("2024-06-15"), 70.0).uniform(reflectance(1000.0, 3000.0, 0.0)));

        let extractor = TimeSeriesExtractor::new(geo.clone(), AnalysisSettings::default());
        let series = extractor
            .extract(&classified, &field(), d("2024-06-01"), d("2024-07-01"))
            .await
            .unwrap();

        assert_eq!(geo.round_trips(), 1);
        let wheat = &series["Wheat (Late Grain)"];
        assert_eq!(wheat.dates, vec![d("2024-06-05"), d("2024-06-10")]);
        assert_relative_eq!(wheat.series("NDVI")[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(wheat.series("NDVI")[1], 0.2, epsilon = 1e-9);
        assert_eq!(wheat.series("SAVI").len(), 2);

        let water = &series["Water"];
        assert_eq!(water.dates, vec![d("2024-06-05")]);
        assert_eq!(water.indices.len(), SpectralIndex::TREND.len());
    }

    #[tokio::test]
    async fn test_unknown_class_gets_generic_label() {
        let geo = Arc::new(InMemoryGeoService::new(1));
        let classified = classified(&geo, vec![Some(42.0)]);
        geo.add_scene(Scene::sentinel2(d("2024-06-05"), 10.0).uniform(reflectance(1000.0, 3000.0, 0.0)));

        let series = TimeSeriesExtractor::new(geo, AnalysisSettings::default())
            .extract(&classified, &field(), d("2024-06-01"), d("2024-07-01"))
            .await
            .unwrap();
        assert!(series.contains_key("Class 42"));
    }
}
