//! Temporal composites of a filtered collection.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Boundary;

use super::collection::CollectionQuery;
use super::expr::{ImageExpr, Pixel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMethod {
    /// Per-band median of every unmasked observation.
    Median,
    /// The first image in collection order, masked pixels included.
    First,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSpec {
    pub query: CollectionQuery,
    pub method: CompositeMethod,
}

/// Builds the composites every analysis starts from, bound to one boundary.
#[derive(Debug, Clone, Copy)]
pub struct CompositeBuilder<'a> {
    boundary: &'a Boundary,
}

impl<'a> CompositeBuilder<'a> {
    pub fn new(boundary: &'a Boundary) -> Self {
        Self { boundary }
    }

    pub fn optical_query(&self, start: NaiveDate, end: NaiveDate, max_cloud_pct: f64) -> CollectionQuery {
        CollectionQuery::sentinel2(self.boundary, start, end).max_cloud(max_cloud_pct)
    }

    /// Cloud-masked median of Sentinel-2 over `[start, end)` below the cloud threshold.
    pub fn optical(&self, start: NaiveDate, end: NaiveDate, max_cloud_pct: f64) -> ImageExpr {
        self.optical_query(start, end, max_cloud_pct).median()
    }

    /// First cloud-masked image acquired on `day`, with no cloud threshold.
    pub fn optical_on(&self, day: NaiveDate) -> ImageExpr {
        CollectionQuery::sentinel2_day(self.boundary, day).first()
    }

    pub fn radar_query(&self, start: NaiveDate, end: NaiveDate, pols: &[&str]) -> CollectionQuery {
        CollectionQuery::sentinel1(self.boundary, start, end).polarisations(pols)
    }

    /// IW-mode Sentinel-1 median over `[start, end)` carrying every polarisation in `pols`.
    pub fn radar(&self, start: NaiveDate, end: NaiveDate, pols: &[&str]) -> ImageExpr {
        self.radar_query(start, end, pols).median()
    }
}

/// Reduce one pixel's observations across a collection.
pub fn composite_pixels(method: CompositeMethod, observations: Vec<Option<Pixel>>) -> Option<Pixel> {
    match method {
        CompositeMethod::First => observations.into_iter().next().flatten(),
        CompositeMethod::Median => {
            let mut order: Vec<String> = Vec::new();
            let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for pixel in observations.into_iter().flatten() {
                for (name, value) in pixel.iter() {
                    if !values.contains_key(name) {
                        order.push(name.to_string());
                    }
                    values.entry(name.to_string()).or_default().push(value);
                }
            }
            if order.is_empty() {
                return None;
            }
            let mut out = Pixel::default();
            for name in order {
                if let Some(mut vs) = values.remove(&name) {
                    out.set(&name, median(&mut vs));
                }
            }
            Some(out)
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_ignores_masked_observations() {
        let obs = vec![
            Some(Pixel::from_pairs(&[("B4", 100.0), ("B8", 300.0)])),
            None,
            Some(Pixel::from_pairs(&[("B4", 300.0), ("B8", 500.0)])),
            Some(Pixel::from_pairs(&[("B4", 200.0), ("B8", 400.0)])),
        ];
        let out = composite_pixels(CompositeMethod::Median, obs).unwrap();
        assert_eq!(out.get("B4"), Some(200.0));
        assert_eq!(out.get("B8"), Some(400.0));
    }

    #[test]
    fn test_median_of_even_count_averages() {
        let obs = vec![
            Some(Pixel::single("VH", -18.0)),
            Some(Pixel::single("VH", -16.0)),
        ];
        let out = composite_pixels(CompositeMethod::Median, obs).unwrap();
        assert_eq!(out.get("VH"), Some(-17.0));
    }

    #[test]
    fn test_empty_and_first() {
        assert!(composite_pixels(CompositeMethod::Median, vec![None, None]).is_none());
        assert!(composite_pixels(CompositeMethod::First, vec![]).is_none());
        let first = composite_pixels(
            CompositeMethod::First,
            vec![None, Some(Pixel::single("B4", 1.0))],
        );
        assert!(first.is_none());
    }
}
