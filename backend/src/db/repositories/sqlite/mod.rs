//! SQLite cache repository using Diesel.
//!
//! One table, `results(key TEXT PRIMARY KEY, data TEXT, timestamp DATETIME)`,
//! created on first open. Connections come from an r2d2 pool and every query
//! runs on the blocking thread pool with retry on transient failures
//! (pool exhaustion, a locked database).

use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::sql_query;
use diesel::sqlite::SqliteConnection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;

use crate::config::CacheSettings;
use crate::db::models::CacheEntry;
use crate::db::repository::{CacheRepository, ErrorContext, RepositoryError, RepositoryResult};

mod schema;

use schema::results;

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

const CREATE_RESULTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS results (\
    key TEXT PRIMARY KEY, \
    data TEXT NOT NULL, \
    timestamp DATETIME NOT NULL)";

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, created if missing.
    pub path: PathBuf,
    pub max_pool_size: u32,
    pub connection_timeout_sec: u64,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u32,
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("analysis_cache.db"),
            max_pool_size: 4,
            connection_timeout_sec: 30,
            busy_timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl SqliteConfig {
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            path: settings.path.clone(),
            max_pool_size: settings.max_connections.max(1),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct BusyTimeout(u32);

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for BusyTimeout {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        sql_query(format!("PRAGMA busy_timeout = {}", self.0))
            .execute(conn)
            .map(|_| ())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct ResultRow {
    key: String,
    data: String,
    timestamp: NaiveDateTime,
}

impl From<CacheEntry> for ResultRow {
    fn from(entry: CacheEntry) -> Self {
        Self {
            key: entry.key,
            data: entry.data,
            timestamp: entry.timestamp,
        }
    }
}

impl From<ResultRow> for CacheEntry {
    fn from(row: ResultRow) -> Self {
        CacheEntry {
            key: row.key,
            data: row.data,
            timestamp: row.timestamp,
        }
    }
}

/// Diesel-backed cache repository for SQLite.
#[derive(Clone)]
pub struct SqliteCacheRepository {
    pool: SqlitePool,
    config: SqliteConfig,
}

impl std::fmt::Debug for SqliteCacheRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCacheRepository")
            .field("config", &self.config)
            .finish()
    }
}

impl SqliteCacheRepository {
    /// Open (or create) the database file and ensure the table exists.
    pub fn new(config: SqliteConfig) -> RepositoryResult<Self> {
        let url = config.path.to_string_lossy().into_owned();
        let manager = ConnectionManager::<SqliteConnection>::new(url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .connection_customizer(Box::new(BusyTimeout(config.busy_timeout_ms)))
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("path={}", config.path.display())),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_schema"),
                )
            })?;
            sql_query(CREATE_RESULTS_TABLE)
                .execute(&mut conn)
                .map_err(|e| {
                    RepositoryError::internal_with_context(
                        format!("Schema creation failed: {}", e),
                        ErrorContext::new("create_table").with_entity("results"),
                    )
                })?;
        }

        log::info!("Opened SQLite cache at {}", config.path.display());
        Ok(Self { pool, config })
    }

    /// Run a query on the blocking pool, retrying transient failures with
    /// exponential backoff.
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1)),
                        );
                        last_error = Some(err);
                        continue;
                    }
                };

                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        log::debug!("Retrying cache query after: {}", e);
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }
}

#[async_trait]
impl CacheRepository for SqliteCacheRepository {
    async fn fetch(&self, key: &str) -> RepositoryResult<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = results::table
                .find(&key)
                .select(ResultRow::as_select())
                .first(conn)
                .optional()
                .map_err(|e| RepositoryError::from(e).with_operation("fetch"))?;
            Ok(row.map(CacheEntry::from))
        })
        .await
    }

    async fn upsert(&self, entry: CacheEntry) -> RepositoryResult<()> {
        let row = ResultRow::from(entry);
        self.with_conn(move |conn| {
            diesel::replace_into(results::table)
                .values(&row)
                .execute(conn)
                .map_err(|e| RepositoryError::from(e).with_operation("upsert"))?;
            Ok(())
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> RepositoryResult<usize> {
        self.with_conn(move |conn| {
            diesel::delete(results::table.filter(results::timestamp.lt(cutoff)))
                .execute(conn)
                .map_err(|e| RepositoryError::from(e).with_operation("delete_older_than"))
        })
        .await
    }

    async fn count(&self) -> RepositoryResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = results::table
                .count()
                .get_result(conn)
                .map_err(|e| RepositoryError::from(e).with_operation("count"))?;
            Ok(n.max(0) as usize)
        })
        .await
    }

    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(RepositoryError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn open(dir: &tempfile::TempDir) -> SqliteCacheRepository {
        SqliteCacheRepository::new(SqliteConfig::with_path(dir.path().join("cache.db"))).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir);

        repo.upsert(CacheEntry::new("abc", "{\"source\":\"S2\"}")).await.unwrap();
        repo.upsert(CacheEntry::new("abc", "{\"source\":\"S1\"}")).await.unwrap();

        let entry = repo.fetch("abc").await.unwrap().unwrap();
        assert_eq!(entry.data, "{\"source\":\"S1\"}");
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(repo.fetch("nope").await.unwrap().is_none());
        assert!(repo.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        open(&dir).upsert(CacheEntry::new("k", "{}")).await.unwrap();
        assert!(open(&dir).fetch("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir);
        let now = chrono::Utc::now().naive_utc();
        repo.upsert(CacheEntry::new("old", "{}").with_timestamp(now - ChronoDuration::days(8)))
            .await
            .unwrap();
        repo.upsert(CacheEntry::new("fresh", "{}").with_timestamp(now))
            .await
            .unwrap();

        assert_eq!(repo.delete_older_than(now - ChronoDuration::days(7)).await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
