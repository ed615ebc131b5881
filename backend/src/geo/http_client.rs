//! JSON-over-HTTP client for the geospatial service.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::GeoSettings;
use crate::imagery::{CollectionQuery, ImageExpr};

use super::error::{GeoError, GeoResult};
use super::types::{ImageInfo, ImageReduction, Reduction, ReductionBatch, ReductionValue, VisParams};
use super::GeoService;

pub struct HttpGeoService {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct SizesRequest<'a> {
    queries: &'a BTreeMap<String, CollectionQuery>,
}

#[derive(Deserialize)]
struct SizesResponse {
    sizes: BTreeMap<String, u64>,
}

#[derive(Deserialize)]
struct FirstResponse {
    image: Option<ImageInfo>,
}

#[derive(Serialize)]
struct ReduceRequest<'a> {
    reductions: &'a ReductionBatch,
}

#[derive(Deserialize)]
struct ReduceResponse {
    results: BTreeMap<String, ReductionValue>,
}

#[derive(Serialize)]
struct MapReduceRequest<'a> {
    query: &'a CollectionQuery,
    reduction: &'a Reduction,
}

#[derive(Deserialize)]
struct MapReduceResponse {
    items: Vec<ImageReduction>,
}

#[derive(Serialize)]
struct TileRequest<'a> {
    image: &'a ImageExpr,
    vis: &'a VisParams,
}

#[derive(Deserialize)]
struct TileResponse {
    url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl HttpGeoService {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
        max_retries: u32,
    ) -> GeoResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            max_retries,
            request_timeout,
        })
    }

    pub fn from_settings(settings: &GeoSettings) -> GeoResult<Self> {
        Self::new(
            settings.endpoint.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
            settings.max_retries,
        )
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> GeoResult<R> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = self.execute_with_retry(request).await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|b| b.message)
                .unwrap_or_default();
            return Err(GeoError::Service {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|e| GeoError::Decode(e.to_string()))
    }

    /// Send with exponential backoff on timeouts and connection failures.
    async fn execute_with_retry(&self, request: reqwest::RequestBuilder) -> GeoResult<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff_ms = backoff_millis(attempt);
                log::debug!("Retrying geo request (attempt {}) in {} ms", attempt + 1, backoff_ms);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            let Some(cloned) = request.try_clone() else {
                return Ok(request.send().await?);
            };
            match cloned.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() => last_err = Some(GeoError::Timeout(self.request_timeout)),
                Err(e) if e.is_connect() => last_err = Some(GeoError::Network(e.to_string())),
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err.unwrap_or(GeoError::Timeout(self.request_timeout)))
    }
}

const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Delay before retry `attempt` (1-based): doubles from 200 ms, capped at 30 s.
fn backoff_millis(attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(BACKOFF_MAX_MS, |factor| BACKOFF_BASE_MS.saturating_mul(factor))
        .min(BACKOFF_MAX_MS)
}

#[async_trait]
impl GeoService for HttpGeoService {
    async fn collection_sizes(
        &self,
        queries: &BTreeMap<String, CollectionQuery>,
    ) -> GeoResult<BTreeMap<String, u64>> {
        let response: SizesResponse = self
            .post("/v1/collections/sizes", &SizesRequest { queries })
            .await?;
        Ok(response.sizes)
    }

    async fn first_image(&self, query: &CollectionQuery) -> GeoResult<Option<ImageInfo>> {
        let response: FirstResponse = self.post("/v1/collections/first", query).await?;
        Ok(response.image)
    }

    async fn reduce_batch(
        &self,
        batch: &ReductionBatch,
    ) -> GeoResult<BTreeMap<String, ReductionValue>> {
        let response: ReduceResponse = self
            .post("/v1/reduce", &ReduceRequest { reductions: batch })
            .await?;
        Ok(response.results)
    }

    async fn map_reduce(
        &self,
        query: &CollectionQuery,
        reduction: &Reduction,
    ) -> GeoResult<Vec<ImageReduction>> {
        let response: MapReduceResponse = self
            .post("/v1/map-reduce", &MapReduceRequest { query, reduction })
            .await?;
        Ok(response.items)
    }

    async fn tile_url(&self, image: &ImageExpr, vis: &VisParams) -> GeoResult<String> {
        let response: TileResponse = self.post("/v1/tiles", &TileRequest { image, vis }).await?;
        Ok(response.url)
    }
}
