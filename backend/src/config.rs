//! Application configuration.
//!
//! Settings come from an `agroneo.toml` file (every key optional) with
//! environment variables layered on top:
//!
//! - `AGRONEO_CONFIG`: explicit path to the TOML file
//! - `CACHE_BACKEND`: `local` or `sqlite`
//! - `CACHE_PATH`: SQLite database file
//! - `GEO_ENDPOINT`, `GEO_API_KEY`: geospatial service
//! - `LICENSE_ENDPOINT`: licensing document store (unset = unlimited)
//! - `HOST`, `PORT`: HTTP bind address

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::repository::RepositoryError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub geo: GeoSettings,
    #[serde(default)]
    pub licensing: LicensingSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_prune_after_days")]
    pub prune_after_days: i64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            path: default_cache_path(),
            prune_after_days: default_prune_after_days(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_cache_backend() -> String {
    "local".to_string()
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("analysis_cache.db")
}

fn default_prune_after_days() -> i64 {
    7
}

fn default_max_connections() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoSettings {
    #[serde(default = "default_geo_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_geo_retries")]
    pub max_retries: u32,
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            endpoint: default_geo_endpoint(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_geo_retries(),
        }
    }
}

fn default_geo_endpoint() -> String {
    "http://localhost:8787".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_geo_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicensingSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_trial_credits")]
    pub trial_credits: i64,
}

impl Default for LicensingSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            identity_file: None,
            trial_credits: default_trial_credits(),
        }
    }
}

fn default_trial_credits() -> i64 {
    15
}

impl LicensingSettings {
    /// Identity file location, `~/.agroneo_id.json` unless configured.
    pub fn identity_path(&self) -> PathBuf {
        self.identity_file.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".agroneo_id.json")
        })
    }
}

/// Thresholds of the analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Minimum valid/total pixel ratio for optical data to be used.
    #[serde(default = "default_coverage_floor")]
    pub coverage_floor: f64,
    /// Classes below this share (percent) are folded into the keepers.
    #[serde(default = "default_significance_floor")]
    pub significance_floor_pct: f64,
    #[serde(default = "default_optical_cloud")]
    pub optical_cloud_pct: f64,
    #[serde(default = "default_classification_cloud")]
    pub classification_cloud_pct: f64,
    #[serde(default = "default_trend_cloud")]
    pub trend_cloud_pct: f64,
    #[serde(default = "default_canopy_asset")]
    pub canopy_asset: String,
    #[serde(default = "default_canopy_band")]
    pub canopy_band: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            coverage_floor: default_coverage_floor(),
            significance_floor_pct: default_significance_floor(),
            optical_cloud_pct: default_optical_cloud(),
            classification_cloud_pct: default_classification_cloud(),
            trend_cloud_pct: default_trend_cloud(),
            canopy_asset: default_canopy_asset(),
            canopy_band: default_canopy_band(),
        }
    }
}

fn default_coverage_floor() -> f64 {
    0.30
}

fn default_significance_floor() -> f64 {
    6.5
}

fn default_optical_cloud() -> f64 {
    30.0
}

fn default_classification_cloud() -> f64 {
    20.0
}

fn default_trend_cloud() -> f64 {
    50.0
}

fn default_canopy_asset() -> String {
    "UMD/hansen/global_forest_change_2024_v1_12".to_string()
}

fn default_canopy_band() -> String {
    "treecover2000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Minutes a finished job stays queryable.
    #[serde(default = "default_job_retention_minutes")]
    pub job_retention_minutes: i64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            job_retention_minutes: default_job_retention_minutes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_job_retention_minutes() -> i64 {
    crate::services::job_tracker::DEFAULT_RETENTION_MINUTES
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RepositoryError::configuration(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RepositoryError> {
        toml::from_str(content).map_err(|e| {
            RepositoryError::configuration(format!("Failed to parse config file: {}", e))
        })
    }

    /// Search `agroneo.toml` in the current directory, `backend/` and the
    /// parent directory. Falls back to defaults when none exists.
    pub fn from_default_location() -> Result<Self, RepositoryError> {
        let search_paths = [
            PathBuf::from("agroneo.toml"),
            PathBuf::from("backend/agroneo.toml"),
            PathBuf::from("../agroneo.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                log::info!("Loading configuration from {}", path.display());
                return Self::from_file(&path);
            }
        }

        log::debug!("No agroneo.toml found, using defaults");
        Ok(Self::default())
    }

    /// File configuration (explicit `AGRONEO_CONFIG` or default search) with
    /// environment overrides applied.
    pub fn load() -> Result<Self, RepositoryError> {
        let mut config = match std::env::var("AGRONEO_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::from_default_location()?,
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment variable overrides in place.
    pub fn apply_env(&mut self) {
        if let Ok(backend) = std::env::var("CACHE_BACKEND") {
            self.cache.backend = backend;
        }
        if let Ok(path) = std::env::var("CACHE_PATH") {
            self.cache.path = PathBuf::from(path);
        }
        if let Ok(endpoint) = std::env::var("GEO_ENDPOINT") {
            self.geo.endpoint = endpoint;
        }
        if let Ok(key) = std::env::var("GEO_API_KEY") {
            self.geo.api_key = Some(key);
        }
        if let Ok(endpoint) = std::env::var("LICENSE_ENDPOINT") {
            self.licensing.endpoint = Some(endpoint);
        }
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }
}
