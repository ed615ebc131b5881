//! Seam to the remote geospatial query service.
//!
//! All per-pixel work (filtering, compositing, band math, regional
//! reductions, tile rendering) happens on the service. Callers describe it
//! with [`ImageExpr`] trees and batch reductions into one round trip where
//! they can.
//!
//! - [`HttpGeoService`]: JSON over HTTP with timeout and retry.
//! - [`InMemoryGeoService`]: an in-process emulator over synthetic scenes,
//!   used by tests and local development.

pub mod error;
pub mod http_client;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::imagery::{CollectionQuery, ImageExpr};

pub use error::{GeoError, GeoResult};
pub use http_client::HttpGeoService;
pub use memory::{InMemoryGeoService, Scene};
pub use types::{
    GroupMean, ImageInfo, ImageReduction, Reducer, Reduction, ReductionBatch, ReductionValue,
    VisParams,
};

#[async_trait]
pub trait GeoService: Send + Sync {
    /// Image counts of several collections in one round trip.
    async fn collection_sizes(
        &self,
        queries: &BTreeMap<String, CollectionQuery>,
    ) -> GeoResult<BTreeMap<String, u64>>;

    /// Metadata of the first image in query order, if any.
    async fn first_image(&self, query: &CollectionQuery) -> GeoResult<Option<ImageInfo>>;

    /// Evaluate every named reduction in one round trip.
    async fn reduce_batch(
        &self,
        batch: &ReductionBatch,
    ) -> GeoResult<BTreeMap<String, ReductionValue>>;

    /// Apply `reduction` to each image of `query` in time order. The
    /// reduction's image refers to the mapped image as [`ImageExpr::Current`].
    async fn map_reduce(
        &self,
        query: &CollectionQuery,
        reduction: &Reduction,
    ) -> GeoResult<Vec<ImageReduction>>;

    async fn tile_url(&self, image: &ImageExpr, vis: &VisParams) -> GeoResult<String>;

    /// Single reduction through [`GeoService::reduce_batch`].
    async fn reduce(&self, reduction: Reduction) -> GeoResult<ReductionValue> {
        let mut batch = ReductionBatch::new();
        batch.insert("result".to_string(), reduction);
        let mut results = self.reduce_batch(&batch).await?;
        Ok(results.remove("result").unwrap_or(ReductionValue::Null))
    }
}
