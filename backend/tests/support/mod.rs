#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use agroneo::config::AnalysisSettings;
use agroneo::db::{CacheRepository, LocalCacheRepository, ResultCache};
use agroneo::geo::{InMemoryGeoService, Scene};
use agroneo::imagery::Pixel;
use agroneo::models::{AnalysisRequest, Boundary, DateWindow};
use agroneo::services::{AnalysisPipeline, UnlimitedLicense};
use chrono::NaiveDate;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// Restores the previous values on unwind and serializes access to the
/// process environment across parallel tests.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

pub fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn field() -> Boundary {
    Boundary::polygon(vec![[32.0, 39.0], [32.01, 39.0], [32.01, 39.01], [32.0, 39.01]])
}

pub fn field_geojson() -> serde_json::Value {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": [[[32.0, 39.0], [32.01, 39.0], [32.01, 39.01], [32.0, 39.01], [32.0, 39.0]]]
    })
}

pub fn bands() -> Vec<String> {
    ["B2", "B3", "B4", "B8", "B11"].iter().map(|b| b.to_string()).collect()
}

/// Cloud-free Sentinel-2 pixel with the given red and near-infrared values.
pub fn optical(b4: f64, b8: f64) -> Pixel {
    Pixel::from_pairs(&[
        ("B2", 400.0),
        ("B3", 500.0),
        ("B4", b4),
        ("B8", b8),
        ("B11", 1500.0),
        ("QA60", 0.0),
    ])
}

/// NDVI 0.7.
pub fn trees() -> Pixel {
    optical(600.0, 3400.0)
}

pub fn s1(date: &str, vv: f64, vh: f64) -> Scene {
    Scene::sentinel1(d(date)).uniform(Pixel::from_pairs(&[("VV", vv), ("VH", vh)]))
}

pub fn s2(date: &str, cloud: f64, pixel: Pixel) -> Scene {
    Scene::sentinel2(d(date), cloud).uniform(pixel)
}

/// Spring, June, summer and radar acquisitions of a wooded field for `year`.
pub fn wooded_year(geo: &InMemoryGeoService, year: i32) {
    geo.add_scene(s2(&format!("{}-04-10", year), 5.0, trees()));
    geo.add_scene(s2(&format!("{}-06-25", year), 5.0, trees()));
    geo.add_scene(s2(&format!("{}-07-15", year), 5.0, trees()));
    geo.add_scene(s1(&format!("{}-07-20", year), -8.0, -12.0));
}

/// Emulator with the canopy asset classification expects.
pub fn geo_service() -> Arc<InMemoryGeoService> {
    let settings = AnalysisSettings::default();
    let geo = Arc::new(InMemoryGeoService::new(4));
    geo.add_asset(&settings.canopy_asset, &settings.canopy_band, vec![Some(45.0)]);
    geo
}

pub fn june_range() -> AnalysisRequest {
    AnalysisRequest::new(
        field(),
        bands(),
        DateWindow::range(d("2024-06-01"), d("2024-06-30")).unwrap(),
    )
}

pub struct Harness {
    pub geo: Arc<InMemoryGeoService>,
    pub cache_repo: Arc<dyn CacheRepository>,
    pub license: Arc<UnlimitedLicense>,
    pub pipeline: AnalysisPipeline,
}

pub fn harness() -> Harness {
    harness_with_cache(Arc::new(LocalCacheRepository::new()))
}

pub fn harness_with_cache(cache_repo: Arc<dyn CacheRepository>) -> Harness {
    let geo = geo_service();
    let license = Arc::new(UnlimitedLicense::new());
    let pipeline = AnalysisPipeline::new(
        geo.clone(),
        ResultCache::new(cache_repo.clone()),
        license.clone(),
        AnalysisSettings::default(),
    );
    Harness {
        geo,
        cache_repo,
        license,
        pipeline,
    }
}
