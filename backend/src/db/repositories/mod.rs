//! Cache repository implementations:
//! - `local`: in-memory map for tests and local development
//! - `sqlite`: SQLite file through Diesel
pub mod local;
#[cfg(feature = "sqlite-cache")]
pub mod sqlite;

pub use local::LocalCacheRepository;
#[cfg(feature = "sqlite-cache")]
pub use sqlite::{SqliteCacheRepository, SqliteConfig};
