//! SQLite storage backing the artifact cache.
//!
//! A single database file holds every cache entry. Connections run in WAL
//! mode with a busy timeout; schema migrations are embedded at compile time.
//!
//! # Example
//!
//! ```no_run
//! use report_crawler::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("reports_cache.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Kept low because SQLite serializes writers at the file level.
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to connect to cache database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to migrate cache database: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to create cache directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Pooled connection to the cache database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` and applies
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the parent directory cannot be created, the
    /// connection fails, or a migration fails.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DbError::Directory {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("cache database ready");

        Ok(Self { pool })
    }

    /// In-memory database for tests. Lives as long as its single connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reports whether the journal is in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Closes every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
