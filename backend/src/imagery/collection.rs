//! Image collection filters sent to the geospatial service.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::Boundary;

use super::composite::{CompositeMethod, CompositeSpec};
use super::expr::ImageExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "COPERNICUS/S2_SR_HARMONIZED")]
    Sentinel2,
    #[serde(rename = "COPERNICUS/S1_GRD")]
    Sentinel1,
}

impl Collection {
    pub fn id(self) -> &'static str {
        match self {
            Collection::Sentinel2 => "COPERNICUS/S2_SR_HARMONIZED",
            Collection::Sentinel1 => "COPERNICUS/S1_GRD",
        }
    }
}

/// Ordering on acquisition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Filter over one collection: bounds, `[start, end)`, metadata thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub collection: Collection,
    pub boundary: Boundary,
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cloud_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub polarisations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_mode: Option<String>,
    /// Apply the QA60 mask to every image before compositing.
    #[serde(default)]
    pub cloud_mask: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
}

impl CollectionQuery {
    /// Cloud-masked Sentinel-2 surface reflectance.
    pub fn sentinel2(boundary: &Boundary, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            collection: Collection::Sentinel2,
            boundary: boundary.clone(),
            start,
            end,
            max_cloud_pct: None,
            polarisations: Vec::new(),
            instrument_mode: None,
            cloud_mask: true,
            sort: None,
        }
    }

    /// Sentinel-1 GRD in interferometric wide swath mode.
    pub fn sentinel1(boundary: &Boundary, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            collection: Collection::Sentinel1,
            boundary: boundary.clone(),
            start,
            end,
            max_cloud_pct: None,
            polarisations: Vec::new(),
            instrument_mode: Some("IW".to_string()),
            cloud_mask: false,
            sort: None,
        }
    }

    /// Images acquired on `day` only.
    pub fn sentinel2_day(boundary: &Boundary, day: NaiveDate) -> Self {
        Self::sentinel2(boundary, day, day.succ_opt().unwrap_or(day))
    }

    /// Keep images with cloudy-pixel percentage strictly below `pct`.
    pub fn max_cloud(mut self, pct: f64) -> Self {
        self.max_cloud_pct = Some(pct);
        self
    }

    /// Require every listed polarisation.
    pub fn polarisations(mut self, pols: &[&str]) -> Self {
        self.polarisations = pols.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn sorted(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Temporal median composite of this collection.
    pub fn median(self) -> ImageExpr {
        ImageExpr::composite(CompositeSpec {
            query: self,
            method: CompositeMethod::Median,
        })
    }

    /// First image in collection order.
    pub fn first(self) -> ImageExpr {
        ImageExpr::composite(CompositeSpec {
            query: self,
            method: CompositeMethod::First,
        })
    }
}
