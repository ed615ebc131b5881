use super::*;
use approx::assert_relative_eq;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::{CacheRepository, LocalCacheRepository};
use crate::geo::{InMemoryGeoService, Scene};
use crate::imagery::cloud_mask::CLOUD_BIT;
use crate::imagery::Pixel;
use crate::models::{Boundary, CandidateSide, DateWindow};
use crate::services::licensing::{AccessDecision, UnlimitedLicense};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn field() -> Boundary {
    Boundary::polygon(vec![[32.0, 39.0], [32.01, 39.0], [32.01, 39.01], [32.0, 39.01]])
}

fn optical(b4: f64, b8: f64, qa: f64) -> Pixel {
    Pixel::from_pairs(&[
        ("B2", 400.0),
        ("B3", 700.0),
        ("B4", b4),
        ("B8", b8),
        ("B11", 1800.0),
        ("QA60", qa),
    ])
}

fn s2(date: &str, cloud: f64, b4: f64, b8: f64) -> Scene {
    Scene::sentinel2(d(date), cloud).uniform(optical(b4, b8, 0.0))
}

fn s1(date: &str, vv: f64, vh: f64) -> Scene {
    Scene::sentinel1(d(date)).uniform(Pixel::from_pairs(&[("VV", vv), ("VH", vh)]))
}

fn bands() -> Vec<String> {
    ["B2", "B3", "B4", "B8", "B11"].iter().map(|b| b.to_string()).collect()
}

fn june_range() -> AnalysisRequest {
    AnalysisRequest::new(
        field(),
        bands(),
        DateWindow::range(d("2024-06-01"), d("2024-06-30")).unwrap(),
    )
}

struct Harness {
    geo: Arc<InMemoryGeoService>,
    license: Arc<UnlimitedLicense>,
    aggregator: StatsAggregator,
}

fn harness() -> Harness {
    let geo = Arc::new(InMemoryGeoService::new(4));
    let license = Arc::new(UnlimitedLicense::new());
    let cache = ResultCache::new(Arc::new(LocalCacheRepository::new()));
    let aggregator = StatsAggregator::new(
        geo.clone(),
        cache,
        license.clone(),
        AnalysisSettings::default(),
    );
    Harness {
        geo,
        license,
        aggregator,
    }
}

fn computed(outcome: StatsOutcome) -> (StatsResult, bool) {
    match outcome {
        StatsOutcome::Computed { stats, cached } => (stats, cached),
        other => panic!("expected computed stats, got {:?}", other),
    }
}

#[tokio::test]
async fn test_optical_range_with_radar_merge() {
    let h = harness();
    h.geo.add_scene(s2("2024-06-10", 5.0, 1000.0, 3000.0));
    h.geo.add_scene(s2("2024-05-01", 5.0, 1500.0, 2500.0));
    h.geo.add_scene(s1("2024-06-03", -12.0, -20.0));

    let outcome = h
        .aggregator
        .aggregate(&june_range(), &CancellationToken::new())
        .await
        .unwrap();
    let (stats, cached) = computed(outcome);

    assert!(!cached);
    assert_eq!(stats.source, DataSource::Optical);
    assert_relative_eq!(stats.band_means["B4"], 1000.0);
    assert_relative_eq!(stats.ndvi().unwrap(), 0.5);
    assert_relative_eq!(stats.past_ndvi.unwrap(), 0.25);
    assert_relative_eq!(stats.ndvi_change.unwrap(), 0.25);
    assert_eq!(stats.vh, Some(-20.0));
    assert_eq!(stats.vv, Some(-12.0));
    assert_relative_eq!(stats.soil_moisture, 2.4 / 15.0, epsilon = 1e-9);

    assert_eq!(h.geo.round_trips(), 1);
    assert_eq!(h.license.consumed(), 1);
}

#[tokio::test]
async fn test_second_identical_request_is_served_from_cache() {
    let h = harness();
    h.geo.add_scene(s2("2024-06-10", 5.0, 1000.0, 3000.0));
    let cancel = CancellationToken::new();

    let (first, _) = computed(h.aggregator.aggregate(&june_range(), &cancel).await.unwrap());
    let trips = h.geo.round_trips();
    let (second, cached) = computed(h.aggregator.aggregate(&june_range(), &cancel).await.unwrap());

    assert!(cached);
    assert_eq!(first, second);
    assert_eq!(h.geo.round_trips(), trips);
    assert_eq!(h.license.consumed(), 1);
}

#[tokio::test]
async fn test_missing_trailing_window_leaves_delta_undefined() {
    let h = harness();
    h.geo.add_scene(s2("2024-06-10", 5.0, 1000.0, 3000.0));

    let (stats, _) = computed(
        h.aggregator
            .aggregate(&june_range(), &CancellationToken::new())
            .await
            .unwrap(),
    );
    assert_eq!(stats.past_ndvi, None);
    assert_eq!(stats.ndvi_change, None);
    assert_eq!(stats.vh, None);
    assert_eq!(stats.soil_moisture, 0.0);
}

#[tokio::test]
async fn test_low_coverage_falls_back_to_radar() {
    let h = harness();
    let cloudy = optical(1000.0, 3000.0, CLOUD_BIT as f64);
    h.geo.add_scene(Scene::sentinel2(d("2024-06-10"), 20.0).with_pixels(vec![
        Some(optical(1000.0, 3000.0, 0.0)),
        Some(cloudy.clone()),
        Some(cloudy.clone()),
        Some(cloudy),
    ]));
    h.geo.add_scene(s1("2024-06-03", -11.0, -18.0));

    let (stats, _) = computed(
        h.aggregator
            .aggregate(&june_range(), &CancellationToken::new())
            .await
            .unwrap(),
    );
    assert!(stats.is_radar());
    assert_eq!(stats.band_means.get("VH"), Some(&-18.0));
    assert_eq!(stats.band_means.get("VV"), Some(&-11.0));
    assert!(stats.derived_indices.is_empty());
    assert_eq!(stats.past_ndvi, None);
}

#[tokio::test]
async fn test_no_optical_or_radar_is_source_exhausted() {
    let h = harness();
    let err = h
        .aggregator
        .aggregate(&june_range(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::SourceExhausted(_)));
    assert_eq!(err.to_string(), "No Optical or Radar data available.");
    assert_eq!(h.license.consumed(), 0);
    assert_eq!(h.aggregator.cache().repository().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_single_date_without_clear_day_offers_candidates() {
    let h = harness();
    h.geo.add_scene(s2("2024-06-10", 10.0, 1000.0, 3000.0));
    h.geo.add_scene(s2("2024-06-15", 80.0, 1000.0, 3000.0));

    let request = AnalysisRequest::new(field(), bands(), DateWindow::single(d("2024-06-15")));
    let outcome = h
        .aggregator
        .aggregate(&request, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        StatsOutcome::NeedsDateSelection { candidates } => {
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].label, CandidateSide::Before);
            assert_eq!(candidates[0].date, d("2024-06-10"));
        }
        other => panic!("expected date selection, got {:?}", other),
    }
    assert_eq!(h.license.consumed(), 0);
}

#[tokio::test]
async fn test_single_date_with_empty_collections_fails() {
    let h = harness();
    let request = AnalysisRequest::new(field(), bands(), DateWindow::single(d("2024-06-15")));
    let err = h
        .aggregator
        .aggregate(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::ImageUnavailable(_)));
    assert_eq!(err.to_string(), "No suitable images found.");
}

#[tokio::test]
async fn test_exact_clear_day_is_used_directly() {
    let h = harness();
    h.geo.add_scene(s2("2024-06-15", 10.0, 1000.0, 3000.0));

    let request = AnalysisRequest::new(field(), bands(), DateWindow::single(d("2024-06-15")));
    let (stats, _) = computed(
        h.aggregator
            .aggregate(&request, &CancellationToken::new())
            .await
            .unwrap(),
    );
    assert_eq!(stats.source, DataSource::Optical);
    // exact-match lookup plus the batched reduction
    assert_eq!(h.geo.round_trips(), 2);
}

#[tokio::test]
async fn test_pinned_date_ignores_cloud_threshold() {
    let h = harness();
    h.geo.add_scene(s2("2024-06-12", 55.0, 900.0, 2700.0));

    let request = AnalysisRequest::new(field(), bands(), DateWindow::single(d("2024-06-15")))
        .with_specific_date(d("2024-06-12"));
    let (stats, _) = computed(
        h.aggregator
            .aggregate(&request, &CancellationToken::new())
            .await
            .unwrap(),
    );
    assert_relative_eq!(stats.band_means["B4"], 900.0);
    assert_eq!(h.geo.round_trips(), 1);
}

struct DenyingLicense;

#[async_trait]
impl LicenseGate for DenyingLicense {
    async fn check_access(&self) -> AccessDecision {
        AccessDecision::deny("Trial period expired. Please contact administrator.")
    }

    async fn decrement_credit(&self) {}

    fn user_id(&self) -> &str {
        "u-42"
    }
}

#[tokio::test]
async fn test_denied_license_stops_before_any_remote_call() {
    let geo = Arc::new(InMemoryGeoService::new(4));
    let aggregator = StatsAggregator::new(
        geo.clone(),
        ResultCache::new(Arc::new(LocalCacheRepository::new())),
        Arc::new(DenyingLicense),
        AnalysisSettings::default(),
    );

    let err = aggregator
        .aggregate(&june_range(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ACCESS_DENIED");
    assert_eq!(
        err.to_string(),
        "Trial period expired. Please contact administrator.\nUser ID: u-42"
    );
    assert_eq!(geo.round_trips(), 0);
}

#[tokio::test]
async fn test_cancelled_request_writes_nothing() {
    let h = harness();
    h.geo.add_scene(s2("2024-06-10", 5.0, 1000.0, 3000.0));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.aggregator.aggregate(&june_range(), &cancel).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled));
    assert_eq!(h.geo.round_trips(), 0);
    assert_eq!(h.license.consumed(), 0);
    assert_eq!(h.aggregator.cache().repository().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_window_at_calendar_start_is_invalid() {
    let h = harness();
    let start = NaiveDate::MIN;
    let request = AnalysisRequest::new(
        field(),
        bands(),
        DateWindow::range(start, start.checked_add_days(chrono::Days::new(10)).unwrap()).unwrap(),
    );

    let err = h
        .aggregator
        .aggregate(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidRequest(_)), "unexpected error: {err:?}");
    assert_eq!(h.geo.round_trips(), 0);
    assert_eq!(h.license.consumed(), 0);
}

#[test]
fn test_coverage_floor_is_inclusive() {
    assert!(check_coverage(30.0, 100.0, 0.30).is_ok());
    let err = check_coverage(29.0, 100.0, 0.30).unwrap_err();
    assert!(matches!(err, AnalysisError::InsufficientCoverage { .. }));
    // zero total reads as one pixel
    assert_eq!(check_coverage(1.0, 0.0, 0.30).unwrap(), 1.0);
}

#[test]
fn test_optical_without_red_band_is_rejected() {
    let mut results = BTreeMap::new();
    let bands = |pairs: &[(&str, f64)]| {
        ReductionValue::Bands(pairs.iter().map(|(k, v)| (k.to_string(), Some(*v))).collect())
    };
    results.insert("total_pixels".to_string(), bands(&[("constant", 4.0)]));
    results.insert("valid_pixels".to_string(), bands(&[("B4", 4.0)]));
    results.insert("optical_stats".to_string(), bands(&[("B8", 3000.0)]));

    let err = decide_source(&results, 0.30).unwrap_err();
    assert!(matches!(err, AnalysisError::SourceExhausted(_)));

    results.insert("s1_stats".to_string(), bands(&[("VH", -17.0)]));
    let stats = decide_source(&results, 0.30).unwrap();
    assert!(stats.is_radar());
    assert_eq!(stats.vv, None);
}
