//! Application state for the HTTP server.

use std::sync::Arc;

use crate::config::{AnalysisSettings, AppConfig};
use crate::db::{CacheFactory, CacheRepository, ResultCache};
use crate::geo::{GeoService, HttpGeoService};
use crate::services::licensing::{HttpLicenseGate, LicenseGate, UnlimitedLicense};
use crate::services::weather::{OpenMeteoClient, WeatherLookup, OPEN_METEO_ARCHIVE};
use crate::services::{AnalysisPipeline, CandidateSearch, JobTracker, TimeSeriesExtractor};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AnalysisPipeline>,
    pub trends: Arc<TimeSeriesExtractor>,
    pub candidates: Arc<CandidateSearch>,
    pub weather: Arc<dyn WeatherLookup>,
    pub job_tracker: JobTracker,
    /// Default age for `DELETE /v1/cache`
    pub cache_prune_days: i64,
}

impl AppState {
    pub fn new(
        geo: Arc<dyn GeoService>,
        cache: Arc<dyn CacheRepository>,
        license: Arc<dyn LicenseGate>,
        weather: Arc<dyn WeatherLookup>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            trends: Arc::new(TimeSeriesExtractor::new(geo.clone(), settings.clone())),
            candidates: Arc::new(CandidateSearch::new(geo.clone())),
            pipeline: Arc::new(AnalysisPipeline::new(
                geo,
                ResultCache::new(cache),
                license,
                settings,
            )),
            weather,
            job_tracker: JobTracker::new(),
            cache_prune_days: crate::config::CacheSettings::default().prune_after_days,
        }
    }

    /// Wire the production collaborators named in `config`.
    ///
    /// Without a licensing endpoint every request is allowed.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let geo: Arc<dyn GeoService> = Arc::new(HttpGeoService::from_settings(&config.geo)?);
        let cache = CacheFactory::from_settings(&config.cache)?;
        let license: Arc<dyn LicenseGate> = match &config.licensing.endpoint {
            Some(endpoint) => Arc::new(HttpLicenseGate::from_settings(endpoint, &config.licensing)?),
            None => {
                log::warn!("No licensing endpoint configured, credits are not enforced");
                Arc::new(UnlimitedLicense::new())
            }
        };
        let weather: Arc<dyn WeatherLookup> = Arc::new(OpenMeteoClient::new(OPEN_METEO_ARCHIVE)?);

        let mut state = Self::new(geo, cache, license, weather, config.analysis.clone());
        state.cache_prune_days = config.cache.prune_after_days;
        state.job_tracker = JobTracker::with_retention_minutes(config.server.job_retention_minutes);
        Ok(state)
    }

    pub fn cache(&self) -> &ResultCache {
        self.pipeline.cache()
    }
}
