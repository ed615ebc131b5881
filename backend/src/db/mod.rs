//! Result cache storage.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  StatsAggregator / HTTP cache endpoints        │
//! └──────────────────────┬────────────────────────┘
//!                        │
//! ┌──────────────────────▼────────────────────────┐
//! │  ResultCache - fingerprints, lenient policy    │
//! └──────────────────────┬────────────────────────┘
//!                        │
//! ┌──────────────────────▼────────────────────────┐
//! │  CacheRepository trait                         │
//! └───────────┬───────────────────────┬───────────┘
//!             │                       │
//!      LocalCacheRepository   SqliteCacheRepository
//!         (in-memory)          (Diesel + r2d2)
//! ```
//!
//! Repositories are built once by [`CacheFactory`] and passed explicitly to
//! whoever needs them; there is no process-wide instance.

#[cfg(not(any(feature = "sqlite-cache", feature = "local-cache")))]
compile_error!("Enable at least one cache backend feature.");

pub mod checksum;
pub mod factory;
pub mod models;
pub mod repositories;
pub mod repository;
pub mod result_cache;

pub use checksum::{fingerprint_text, request_fingerprint};
pub use factory::{CacheBackend, CacheFactory};
pub use models::CacheEntry;
pub use repositories::LocalCacheRepository;
#[cfg(feature = "sqlite-cache")]
pub use repositories::{SqliteCacheRepository, SqliteConfig};
pub use repository::{CacheRepository, ErrorContext, RepositoryError, RepositoryResult};
pub use result_cache::ResultCache;
