//! Repository traits for cache storage.
//!
//! The cache is a single key/value table of serialized statistics. Backends
//! implement [`CacheRepository`]; callers go through
//! [`crate::db::ResultCache`], which adds the lenient read/write policy.

pub mod cache;
pub mod error;

pub use cache::CacheRepository;
pub use error::{ErrorContext, RepositoryError, RepositoryResult};
