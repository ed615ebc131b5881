//! In-process emulator of the geospatial service.
//!
//! The area of interest is a flat grid of `grid_size` pixels. Scenes carry
//! per-pixel band values (one pixel broadcasts to the whole grid) and
//! metadata used by collection filters. Reductions evaluate the same
//! [`ImageExpr`] tree pixel by pixel, so services under test run exactly the
//! requests they would send to the remote service. Every trait call counts as
//! one round trip.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::imagery::cloud_mask;
use crate::imagery::composite::composite_pixels;
use crate::imagery::{Collection, CollectionQuery, CompositeSpec, ImageExpr, Pixel, PixelSource, SortOrder};
use crate::models::BoundingBox;

use super::error::{GeoError, GeoResult};
use super::types::{
    GroupMean, ImageInfo, ImageReduction, Reducer, Reduction, ReductionBatch, ReductionValue,
    VisParams,
};
use super::GeoService;

/// One acquisition in a collection.
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub collection: Collection,
    pub date: NaiveDate,
    pub cloud_pct: f64,
    pub polarisations: Vec<String>,
    pub instrument_mode: Option<String>,
    /// `None` covers every boundary.
    pub footprint: Option<BoundingBox>,
    pub pixels: Vec<Option<Pixel>>,
}

impl Scene {
    pub fn sentinel2(date: NaiveDate, cloud_pct: f64) -> Self {
        Self {
            id: format!("S2_{}", date.format("%Y%m%d")),
            collection: Collection::Sentinel2,
            date,
            cloud_pct,
            polarisations: Vec::new(),
            instrument_mode: None,
            footprint: None,
            pixels: Vec::new(),
        }
    }

    /// Dual-polarised (VV+VH) IW scene.
    pub fn sentinel1(date: NaiveDate) -> Self {
        Self {
            id: format!("S1_{}", date.format("%Y%m%d")),
            collection: Collection::Sentinel1,
            date,
            cloud_pct: 0.0,
            polarisations: vec!["VV".to_string(), "VH".to_string()],
            instrument_mode: Some("IW".to_string()),
            footprint: None,
            pixels: Vec::new(),
        }
    }

    /// Same values on every pixel of the grid.
    pub fn uniform(mut self, pixel: Pixel) -> Self {
        self.pixels = vec![Some(pixel)];
        self
    }

    pub fn with_pixels(mut self, pixels: Vec<Option<Pixel>>) -> Self {
        self.pixels = pixels;
        self
    }

    pub fn with_footprint(mut self, footprint: BoundingBox) -> Self {
        self.footprint = Some(footprint);
        self
    }

    fn pixel(&self, index: usize) -> Option<Pixel> {
        if self.pixels.len() == 1 {
            return self.pixels[0].clone();
        }
        self.pixels.get(index).cloned().flatten()
    }

    fn matches(&self, query: &CollectionQuery) -> bool {
        if self.collection != query.collection || !query.contains_date(self.date) {
            return false;
        }
        if let Some(max) = query.max_cloud_pct {
            if self.cloud_pct >= max {
                return false;
            }
        }
        if !query.polarisations.iter().all(|p| self.polarisations.contains(p)) {
            return false;
        }
        if let Some(mode) = &query.instrument_mode {
            if self.instrument_mode.as_deref() != Some(mode.as_str()) {
                return false;
            }
        }
        match &self.footprint {
            Some(fp) => {
                let bb = query.boundary.bounding_box();
                fp.min_lon <= bb.max_lon
                    && fp.max_lon >= bb.min_lon
                    && fp.min_lat <= bb.max_lat
                    && fp.max_lat >= bb.min_lat
            }
            None => true,
        }
    }

    fn info(&self) -> ImageInfo {
        ImageInfo {
            id: self.id.clone(),
            date: self.date,
            time_start_ms: self.date.and_time(NaiveTime::MIN).and_utc().timestamp_millis(),
            cloud_pct: Some(self.cloud_pct),
        }
    }
}

pub struct InMemoryGeoService {
    grid_size: usize,
    scenes: RwLock<Vec<Scene>>,
    assets: RwLock<HashMap<(String, String), Vec<Option<f64>>>>,
    round_trips: AtomicUsize,
    offline: AtomicBool,
    tiles_offline: AtomicBool,
}

impl InMemoryGeoService {
    pub fn new(grid_size: usize) -> Self {
        Self {
            grid_size,
            scenes: RwLock::new(Vec::new()),
            assets: RwLock::new(HashMap::new()),
            round_trips: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            tiles_offline: AtomicBool::new(false),
        }
    }

    pub fn add_scene(&self, scene: Scene) {
        self.scenes.write().push(scene);
    }

    /// Static raster band, one value per pixel (one value broadcasts).
    pub fn add_asset(&self, id: &str, band: &str, values: Vec<Option<f64>>) {
        self.assets
            .write()
            .insert((id.to_string(), band.to_string()), values);
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Make every call fail as if the service were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make only tile rendering fail.
    pub fn set_tiles_offline(&self, offline: bool) {
        self.tiles_offline.store(offline, Ordering::SeqCst);
    }

    fn begin_call(&self) -> GeoResult<()> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(GeoError::Network("in-memory service offline".to_string()));
        }
        Ok(())
    }

    /// Matching scenes in collection order.
    fn select(&self, query: &CollectionQuery) -> Vec<Scene> {
        let mut scenes: Vec<Scene> = self
            .scenes
            .read()
            .iter()
            .filter(|s| s.matches(query))
            .cloned()
            .collect();
        scenes.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        if query.sort == Some(SortOrder::Descending) {
            scenes.reverse();
        }
        scenes
    }

    fn evaluate(&self, reduction: &Reduction, current: Option<(&Scene, bool)>) -> ReductionValue {
        let pixels = (0..self.grid_size).filter_map(|index| {
            let ctx = PixelContext {
                service: self,
                index,
                current,
            };
            reduction.image.evaluate(&ctx)
        });
        reduce(&reduction.reducer, pixels)
    }
}

struct PixelContext<'a> {
    service: &'a InMemoryGeoService,
    index: usize,
    current: Option<(&'a Scene, bool)>,
}

fn observe(scene: &Scene, index: usize, mask_clouds: bool) -> Option<Pixel> {
    let pixel = scene.pixel(index)?;
    if mask_clouds {
        cloud_mask::mask_pixel(pixel)
    } else {
        Some(pixel)
    }
}

impl PixelSource for PixelContext<'_> {
    fn composite(&self, spec: &CompositeSpec) -> Option<Pixel> {
        let observations = self
            .service
            .select(&spec.query)
            .iter()
            .map(|scene| observe(scene, self.index, spec.query.cloud_mask))
            .collect();
        composite_pixels(spec.method, observations)
    }

    fn current(&self) -> Option<Pixel> {
        let (scene, mask_clouds) = self.current?;
        observe(scene, self.index, mask_clouds)
    }

    fn asset(&self, id: &str, band: &str) -> Option<f64> {
        let assets = self.service.assets.read();
        let values = assets.get(&(id.to_string(), band.to_string()))?;
        if values.len() == 1 {
            values[0]
        } else {
            values.get(self.index).copied().flatten()
        }
    }
}

fn histogram_key(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn reduce(reducer: &Reducer, pixels: impl Iterator<Item = Pixel>) -> ReductionValue {
    match reducer {
        Reducer::Count | Reducer::Mean => {
            let mut sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
            for pixel in pixels {
                for (name, value) in pixel.iter() {
                    let slot = sums.entry(name.to_string()).or_insert((0.0, 0));
                    slot.0 += value;
                    slot.1 += 1;
                }
            }
            let bands = sums
                .into_iter()
                .map(|(name, (sum, n))| {
                    let value = match reducer {
                        Reducer::Count => n as f64,
                        _ => sum / n as f64,
                    };
                    (name, Some(value))
                })
                .collect();
            ReductionValue::Bands(bands)
        }
        Reducer::FrequencyHistogram => {
            let mut histogram: BTreeMap<String, f64> = BTreeMap::new();
            for value in pixels.filter_map(|p| p.first()) {
                *histogram.entry(histogram_key(value)).or_insert(0.0) += 1.0;
            }
            ReductionValue::Histogram(histogram)
        }
        Reducer::GroupedMean {
            group_band,
            value_bands,
        } => {
            let mut groups: BTreeMap<i64, Vec<(f64, u64)>> = BTreeMap::new();
            for pixel in pixels {
                let Some(class) = pixel.get(group_band) else {
                    continue;
                };
                let acc = groups
                    .entry(class.round() as i64)
                    .or_insert_with(|| vec![(0.0, 0); value_bands.len()]);
                for (slot, band) in acc.iter_mut().zip(value_bands) {
                    if let Some(v) = pixel.get(band) {
                        slot.0 += v;
                        slot.1 += 1;
                    }
                }
            }
            ReductionValue::Groups(
                groups
                    .into_iter()
                    .map(|(class, acc)| GroupMean {
                        class,
                        means: acc
                            .into_iter()
                            .map(|(sum, n)| (n > 0).then(|| sum / n as f64))
                            .collect(),
                    })
                    .collect(),
            )
        }
    }
}

#[async_trait]
impl GeoService for InMemoryGeoService {
    async fn collection_sizes(
        &self,
        queries: &BTreeMap<String, CollectionQuery>,
    ) -> GeoResult<BTreeMap<String, u64>> {
        self.begin_call()?;
        Ok(queries
            .iter()
            .map(|(name, query)| (name.clone(), self.select(query).len() as u64))
            .collect())
    }

    async fn first_image(&self, query: &CollectionQuery) -> GeoResult<Option<ImageInfo>> {
        self.begin_call()?;
        Ok(self.select(query).first().map(Scene::info))
    }

    async fn reduce_batch(
        &self,
        batch: &ReductionBatch,
    ) -> GeoResult<BTreeMap<String, ReductionValue>> {
        self.begin_call()?;
        Ok(batch
            .iter()
            .map(|(name, reduction)| (name.clone(), self.evaluate(reduction, None)))
            .collect())
    }

    async fn map_reduce(
        &self,
        query: &CollectionQuery,
        reduction: &Reduction,
    ) -> GeoResult<Vec<ImageReduction>> {
        self.begin_call()?;
        Ok(self
            .select(query)
            .iter()
            .map(|scene| ImageReduction {
                date: scene.date,
                value: self.evaluate(reduction, Some((scene, query.cloud_mask))),
            })
            .collect())
    }

    async fn tile_url(&self, image: &ImageExpr, vis: &VisParams) -> GeoResult<String> {
        self.begin_call()?;
        if self.tiles_offline.load(Ordering::SeqCst) {
            return Err(GeoError::Service {
                status: 503,
                message: "tile rendering unavailable".to_string(),
            });
        }
        let body = serde_json::to_string(&(image, vis)).map_err(|e| GeoError::Decode(e.to_string()))?;
        Ok(format!(
            "memory://tiles/{}/{{z}}/{{x}}/{{y}}",
            &crate::db::checksum::fingerprint_text(&body)[..16]
        ))
    }
}
