//! Rule-based multi-temporal land-cover classifier.
//!
//! Five Sentinel-2 seasonal composites plus a summer Sentinel-1 composite are
//! reduced to a handful of per-pixel signals (seasonal NDVI, moisture, water
//! and built-up indices, VH backscatter, canopy cover). An ordered rule table
//! then paints class ids over a "stubble" background, later rules overwriting
//! earlier ones on the pixels where both hold.
//!
//! The same [`Predicate`] tree is evaluated two ways: [`Predicate::holds`] on
//! plain per-pixel values, and [`Predicate::to_mask`] as an [`ImageExpr`]
//! shipped to the geospatial service. A signal with no data makes every
//! comparison on it undefined, and an undefined predicate never paints.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AnalysisSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo::GeoService;
use crate::imagery::{CollectionQuery, CompositeBuilder, ImageExpr};
use crate::models::{Boundary, LandClass};

/// Band name of the classification raster.
pub const CLASS_BAND: &str = "classification";

/// Backscatter assumed where no summer radar image exists, in dB.
const RADAR_FALLBACK_DB: f64 = -20.0;

/// Per-pixel inputs of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    SpringNdvi,
    SummerNdvi,
    SummerNdmi,
    /// Summer `(B11 - B8) / (B11 + B8)`.
    SummerNdbi,
    SpringNdwi,
    SeptemberNdvi,
    OctoberNdvi,
    TransitionNdvi,
    /// Smoothed summer VH backscatter, dB.
    RadarVh,
    /// Tree canopy cover, percent.
    CanopyCover,
}

/// Boolean condition over [`Signal`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `signal > threshold`
    Above(Signal, f64),
    /// `signal >= threshold`
    AtLeast(Signal, f64),
    /// `signal < threshold`
    Below(Signal, f64),
    /// `a > b`
    Exceeds(Signal, Signal),
    /// `a - b > threshold`
    DropAbove(Signal, Signal, f64),
    /// `a - b < threshold`
    DropBelow(Signal, Signal, f64),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Three-valued evaluation: `None` when a signal it reads is missing.
    pub fn eval(&self, values: &SignalValues) -> Option<bool> {
        match self {
            Predicate::Above(s, t) => Some(values.get(*s)? > *t),
            Predicate::AtLeast(s, t) => Some(values.get(*s)? >= *t),
            Predicate::Below(s, t) => Some(values.get(*s)? < *t),
            Predicate::Exceeds(a, b) => Some(values.get(*a)? > values.get(*b)?),
            Predicate::DropAbove(a, b, t) => Some(values.get(*a)? - values.get(*b)? > *t),
            Predicate::DropBelow(a, b, t) => Some(values.get(*a)? - values.get(*b)? < *t),
            Predicate::All(parts) => {
                let mut all = true;
                for part in parts {
                    all &= part.eval(values)?;
                }
                Some(all)
            }
            Predicate::Any(parts) => {
                let mut any = false;
                for part in parts {
                    any |= part.eval(values)?;
                }
                Some(any)
            }
            Predicate::Not(inner) => inner.eval(values).map(|v| !v),
        }
    }

    pub fn holds(&self, values: &SignalValues) -> bool {
        self.eval(values) == Some(true)
    }

    /// 0/1 mask image of this predicate.
    pub fn to_mask(&self, images: &SignalImages) -> ImageExpr {
        match self {
            Predicate::Above(s, t) => images.get(*s).gt(*t),
            Predicate::AtLeast(s, t) => images.get(*s).gte(*t),
            Predicate::Below(s, t) => images.get(*s).lt(*t),
            Predicate::Exceeds(a, b) => images.get(*a).gt(images.get(*b)),
            Predicate::DropAbove(a, b, t) => images.get(*a).subtract(images.get(*b)).gt(*t),
            Predicate::DropBelow(a, b, t) => images.get(*a).subtract(images.get(*b)).lt(*t),
            Predicate::All(parts) => fold_masks(parts, images, |a, b| a.and(b)),
            Predicate::Any(parts) => fold_masks(parts, images, |a, b| a.or(b)),
            Predicate::Not(inner) => inner.to_mask(images).not(),
        }
    }
}

fn fold_masks(
    parts: &[Predicate],
    images: &SignalImages,
    combine: fn(&ImageExpr, ImageExpr) -> ImageExpr,
) -> ImageExpr {
    let mut masks = parts.iter().map(|p| p.to_mask(images));
    match masks.next() {
        Some(first) => masks.fold(first, |acc, m| combine(&acc, m)),
        None => ImageExpr::constant(1.0),
    }
}

/// Plain per-pixel signal values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalValues(BTreeMap<Signal, f64>);

impl SignalValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, signal: Signal, value: f64) -> Self {
        self.0.insert(signal, value);
        self
    }

    pub fn get(&self, signal: Signal) -> Option<f64> {
        self.0.get(&signal).copied()
    }
}

/// Signal rasters as expressions.
#[derive(Debug, Clone, Default)]
pub struct SignalImages(BTreeMap<Signal, ImageExpr>);

impl SignalImages {
    pub fn insert(&mut self, signal: Signal, image: ImageExpr) {
        self.0.insert(signal, image);
    }

    /// A signal without an image is fully masked.
    pub fn get(&self, signal: Signal) -> ImageExpr {
        self.0
            .get(&signal)
            .cloned()
            .unwrap_or_else(|| ImageExpr::constant(0.0).update_mask(ImageExpr::constant(0.0)))
    }
}

/// Which optional windows had imagery. Only these two change the rule table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowPresence {
    /// June imagery exists, so winter grain splits into barley and wheat.
    pub transition: bool,
    /// October imagery exists for the beet stability test.
    pub october: bool,
}

/// One overlay step.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: &'static str,
    pub class: LandClass,
    pub predicate: Predicate,
}

/// Label of pixels no rule claims.
pub const BACKGROUND: LandClass = LandClass::Stubble;

fn water() -> Predicate {
    use Signal::*;
    Predicate::Any(vec![
        Predicate::Exceeds(SpringNdwi, SpringNdvi),
        Predicate::Above(SpringNdwi, 0.1),
    ])
}

fn structure() -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        Predicate::Below(SpringNdvi, 0.25),
        Predicate::Below(SummerNdvi, 0.25),
        Predicate::Above(SummerNdbi, -0.01),
        water().not(),
    ])
}

fn perennial() -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        Predicate::Above(SpringNdvi, 0.40),
        Predicate::Above(SummerNdvi, 0.40),
    ])
}

fn forest() -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        perennial(),
        Predicate::AtLeast(CanopyCover, 30.0),
        Predicate::Above(RadarVh, -15.0),
        Predicate::Above(SummerNdvi, 0.45),
    ])
}

fn grass() -> Predicate {
    Predicate::All(vec![
        perennial(),
        Predicate::Below(Signal::RadarVh, -16.8),
        forest().not(),
    ])
}

fn orchard() -> Predicate {
    Predicate::All(vec![perennial(), forest().not(), grass().not()])
}

fn winter_crop() -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        Predicate::Above(SpringNdvi, 0.40),
        Predicate::Below(SummerNdvi, 0.30),
    ])
}

fn summer_crop() -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        Predicate::Below(SpringNdvi, 0.35),
        Predicate::Above(SummerNdvi, 0.40),
    ])
}

fn corn() -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        summer_crop(),
        Predicate::Above(SummerNdmi, 0.15),
        Predicate::Below(SeptemberNdvi, 0.35),
        Predicate::Any(vec![
            Predicate::Above(RadarVh, -16.0),
            Predicate::Above(SummerNdvi, 0.60),
        ]),
    ])
}

fn beet_candidate() -> Predicate {
    Predicate::All(vec![
        summer_crop(),
        corn().not(),
        perennial().not(),
        Predicate::Below(Signal::SpringNdvi, 0.35),
    ])
}

fn beet(presence: WindowPresence) -> Predicate {
    use Signal::*;
    let stays_green = if presence.october {
        Predicate::All(vec![
            Predicate::Above(OctoberNdvi, 0.55),
            Predicate::DropBelow(SummerNdvi, OctoberNdvi, 0.25),
        ])
    } else {
        Predicate::Above(SeptemberNdvi, 0.60)
    };
    Predicate::All(vec![
        beet_candidate(),
        Predicate::Above(SummerNdvi, 0.65),
        Predicate::Above(SummerNdmi, 0.15),
        stays_green,
    ])
}

fn sunflower(presence: WindowPresence) -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        beet_candidate(),
        beet(presence).not(),
        Predicate::Above(SummerNdvi, 0.60),
        Predicate::Below(SeptemberNdvi, 0.40),
        Predicate::DropAbove(SummerNdvi, SeptemberNdvi, 0.25),
        Predicate::Below(SummerNdmi, 0.15),
    ])
}

fn cotton() -> Predicate {
    use Signal::*;
    Predicate::All(vec![
        summer_crop(),
        Predicate::Above(SummerNdvi, 0.50),
        Predicate::AtLeast(SeptemberNdvi, 0.35),
        Predicate::Below(SeptemberNdvi, 0.65),
        Predicate::Below(RadarVh, -15.0),
        Predicate::Above(RadarVh, -21.0),
        Predicate::Above(SummerNdmi, 0.05),
        Predicate::Below(SummerNdmi, 0.25),
    ])
}

/// Overlay order, first to last. A later rule wins where several hold.
pub fn rule_table(presence: WindowPresence) -> Vec<Rule> {
    let rule = |name, class, predicate| Rule {
        name,
        class,
        predicate,
    };

    let mut rules = vec![
        rule("water", LandClass::Water, water()),
        rule("structure", LandClass::Structure, structure()),
        rule("cotton", LandClass::Cotton, cotton()),
        rule("sunflower", LandClass::Sunflower, sunflower(presence)),
        rule("beet", LandClass::Beet, beet(presence)),
        rule("corn", LandClass::Corn, corn()),
    ];

    if presence.transition {
        let barley = Predicate::All(vec![
            winter_crop(),
            Predicate::Below(Signal::TransitionNdvi, 0.35),
        ]);
        let wheat = Predicate::All(vec![
            winter_crop(),
            Predicate::AtLeast(Signal::TransitionNdvi, 0.35),
        ]);
        rules.push(rule("barley", LandClass::EarlyGrain, barley));
        rules.push(rule("wheat", LandClass::LateGrain, wheat));
    } else {
        rules.push(rule("winter_grain", LandClass::EarlyGrain, winter_crop()));
    }

    rules.push(rule("grass", LandClass::Grass, grass()));
    rules.push(rule("orchard", LandClass::Orchard, orchard()));
    rules.push(rule("forest", LandClass::Forest, forest()));
    rules
}

/// Class of one pixel under `rules`.
pub fn classify_pixel(rules: &[Rule], values: &SignalValues) -> LandClass {
    rules
        .iter()
        .filter(|r| r.predicate.holds(values))
        .last()
        .map(|r| r.class)
        .unwrap_or(BACKGROUND)
}

/// Classification raster: the background painted by every rule in order.
pub fn classification_image(rules: &[Rule], images: &SignalImages) -> ImageExpr {
    rules
        .iter()
        .fold(ImageExpr::constant(BACKGROUND.id() as f64), |image, rule| {
            image.overlay(rule.predicate.to_mask(images), rule.class.id() as f64)
        })
        .rename(&[CLASS_BAND])
}

/// A classification raster ready for reduction.
#[derive(Debug, Clone)]
pub struct ClassifiedImage {
    pub year: i32,
    pub image: ImageExpr,
    pub has_transition: bool,
}

/// Seasonal windows of one year, `[start, end)`.
struct SeasonWindows {
    spring: (NaiveDate, NaiveDate),
    summer: (NaiveDate, NaiveDate),
    september: (NaiveDate, NaiveDate),
    october: (NaiveDate, NaiveDate),
    transition: (NaiveDate, NaiveDate),
    radar: (NaiveDate, NaiveDate),
}

impl SeasonWindows {
    fn for_year(year: i32) -> AnalysisResult<Self> {
        let d = |m: u32, day: u32| {
            NaiveDate::from_ymd_opt(year, m, day)
                .ok_or_else(|| AnalysisError::InvalidRequest(format!("year {} out of range", year)))
        };
        Ok(Self {
            spring: (d(3, 23)?, d(5, 20)?),
            summer: (d(6, 20)?, d(8, 25)?),
            september: (d(9, 1)?, d(9, 30)?),
            october: (d(10, 1)?, d(10, 20)?),
            transition: (d(6, 1)?, d(6, 20)?),
            radar: (d(7, 1)?, d(8, 30)?),
        })
    }
}

/// Builds classification rasters against the geospatial service.
pub struct ClassificationEngine {
    geo: Arc<dyn GeoService>,
    settings: AnalysisSettings,
}

impl ClassificationEngine {
    pub fn new(geo: Arc<dyn GeoService>, settings: AnalysisSettings) -> Self {
        Self { geo, settings }
    }

    /// Classification of `boundary` for `year`.
    ///
    /// Returns `Ok(None)` when the spring or summer window has no imagery.
    /// Missing September/October imagery reads as NDVI 0 and missing radar as
    /// -20 dB. Window sizes are fetched in a single round trip.
    pub async fn build(&self, year: i32, boundary: &Boundary) -> AnalysisResult<Option<ClassifiedImage>> {
        let windows = SeasonWindows::for_year(year)?;
        let composites = CompositeBuilder::new(boundary);
        let cloud = self.settings.classification_cloud_pct;

        let optical = |(start, end): (NaiveDate, NaiveDate)| composites.optical_query(start, end, cloud);
        let queries: BTreeMap<String, CollectionQuery> = [
            ("spring", optical(windows.spring)),
            ("summer", optical(windows.summer)),
            ("sept", optical(windows.september)),
            ("oct", optical(windows.october)),
            ("trans", optical(windows.transition)),
            (
                "s1",
                composites.radar_query(windows.radar.0, windows.radar.1, &["VH"]),
            ),
        ]
        .into_iter()
        .map(|(name, q)| (name.to_string(), q))
        .collect();

        let sizes = self.geo.collection_sizes(&queries).await?;
        let size = |name: &str| sizes.get(name).copied().unwrap_or(0);
        log::debug!("Classification window sizes for {}: {:?}", year, sizes);

        if size("spring") == 0 || size("summer") == 0 {
            log::info!("No spring or summer imagery for {}, classification skipped", year);
            return Ok(None);
        }

        let presence = WindowPresence {
            transition: size("trans") > 0,
            october: size("oct") > 0,
        };

        let composite = |name: &str| queries.get(name).cloned().map(CollectionQuery::median);
        let ndvi = |image: ImageExpr| image.normalized_difference("B8", "B4");

        let mut images = SignalImages::default();
        if let (Some(spring), Some(summer)) = (composite("spring"), composite("summer")) {
            images.insert(Signal::SpringNdvi, ndvi(spring.clone()));
            images.insert(Signal::SpringNdwi, spring.normalized_difference("B3", "B8"));
            images.insert(Signal::SummerNdvi, ndvi(summer.clone()));
            images.insert(Signal::SummerNdmi, summer.normalized_difference("B8", "B11"));
            images.insert(Signal::SummerNdbi, summer.normalized_difference("B11", "B8"));
        }

        let seasonal_ndvi = |name: &str| match composite(name) {
            Some(image) if size(name) > 0 => ndvi(image),
            _ => ImageExpr::constant(0.0),
        };
        images.insert(Signal::SeptemberNdvi, seasonal_ndvi("sept"));
        images.insert(Signal::OctoberNdvi, seasonal_ndvi("oct"));
        if presence.transition {
            images.insert(Signal::TransitionNdvi, seasonal_ndvi("trans"));
        }

        let radar = match composite("s1") {
            Some(image) if size("s1") > 0 => image.select(&["VH"]).focal_median(10.0),
            _ => ImageExpr::constant(RADAR_FALLBACK_DB),
        };
        images.insert(Signal::RadarVh, radar);
        images.insert(
            Signal::CanopyCover,
            ImageExpr::asset(&self.settings.canopy_asset, &self.settings.canopy_band),
        );

        let rules = rule_table(presence);
        Ok(Some(ClassifiedImage {
            year,
            image: classification_image(&rules, &images),
            has_transition: presence.transition,
        }))
    }
}

#[cfg(test)]
#[path = "classification_tests.rs"]
mod tests;
