//! Cache repository factory.
//!
//! Picks a backend from configuration at runtime and hands back a shared
//! trait object.

use std::str::FromStr;
use std::sync::Arc;

use super::repositories::LocalCacheRepository;
#[cfg(feature = "sqlite-cache")]
use super::repositories::{SqliteCacheRepository, SqliteConfig};
use super::repository::{CacheRepository, RepositoryError, RepositoryResult};
use crate::config::CacheSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process map, lost on restart
    Local,
    /// SQLite file through Diesel
    Sqlite,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "memory" => Ok(Self::Local),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(format!("Unknown cache backend: {}", s)),
        }
    }
}

impl CacheBackend {
    /// Backend named by `CACHE_BACKEND`, defaulting to `Local`.
    pub fn from_env() -> Self {
        std::env::var("CACHE_BACKEND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::Local)
    }
}

pub struct CacheFactory;

impl CacheFactory {
    /// Create a repository for `backend`. SQLite uses `settings.path`.
    pub fn create(
        backend: CacheBackend,
        settings: &CacheSettings,
    ) -> RepositoryResult<Arc<dyn CacheRepository>> {
        match backend {
            CacheBackend::Local => Ok(Self::create_local()),
            CacheBackend::Sqlite => {
                #[cfg(feature = "sqlite-cache")]
                {
                    let repo = SqliteCacheRepository::new(SqliteConfig::from_settings(settings))?;
                    Ok(Arc::new(repo))
                }
                #[cfg(not(feature = "sqlite-cache"))]
                {
                    let _ = settings;
                    Err(RepositoryError::configuration(
                        "SQLite cache backend feature not enabled",
                    ))
                }
            }
        }
    }

    pub fn create_local() -> Arc<dyn CacheRepository> {
        Arc::new(LocalCacheRepository::new())
    }

    /// Create the backend named in `settings.backend`.
    pub fn from_settings(settings: &CacheSettings) -> RepositoryResult<Arc<dyn CacheRepository>> {
        let backend = settings.backend.parse::<CacheBackend>().map_err(|e| {
            RepositoryError::configuration(format!("Invalid cache backend: {}", e))
        })?;
        log::info!("Using {:?} cache backend", backend);
        Self::create(backend, settings)
    }
}
