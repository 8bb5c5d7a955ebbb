//! TTL cache of resolved artifact lists.
//!
//! Entries are keyed by `"{category}_{limit}"` and hold the artifacts a crawl
//! resolved (what to fetch, not what was fetched). A hit is only returned
//! while `now < expires_at`; the read that discovers an expired entry deletes
//! it. Writes go straight to the database.
//!
//! Several processes may share one database file. Their writes are not
//! coordinated beyond SQLite's own locking: the last writer of a key wins.
//!
//! # Example
//!
//! ```no_run
//! use report_crawler::{CacheStore, Category, Database};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheStore::new(Database::new_in_memory().await?);
//! if let Some(artifacts) = cache.get(Category::Strategy, 6).await? {
//!     println!("{} cached artifacts", artifacts.len());
//! }
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::CacheError;

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::model::{Artifact, Category};

/// Default lifetime of a cache entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Composite cache key for a (category, limit) pair.
#[must_use]
pub fn cache_key(category: Category, limit: usize) -> String {
    format!("{}_{limit}", category.as_str())
}

/// Snapshot of one cache entry, as reported by [`CacheStore::status`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStatus {
    pub key: String,
    pub category: String,
    pub limit: i64,
    pub created_at: String,
    pub expires_at: String,
    pub expired: bool,
    pub count: i64,
}

/// Summary returned by [`CacheStore::status`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub entry_count: usize,
    pub entries: Vec<CacheEntryStatus>,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    db: Database,
    ttl: chrono::Duration,
}

impl CacheStore {
    /// Cache with the default 24 hour lifetime.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_ttl(db, DEFAULT_TTL)
    }

    #[must_use]
    pub fn with_ttl(db: Database, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self { db, ttl }
    }

    /// Returns the cached artifacts for `(category, limit)` if still fresh.
    ///
    /// An expired or undecodable entry is deleted and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the query fails.
    #[instrument(skip(self), fields(key))]
    pub async fn get(
        &self,
        category: Category,
        limit: usize,
    ) -> Result<Option<Vec<Artifact>>, CacheError> {
        let key = cache_key(category, limit);
        tracing::Span::current().record("key", key.as_str());

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT data, expires_at FROM artifact_cache WHERE cache_key = ?")
                .bind(&key)
                .fetch_optional(self.db.pool())
                .await?;

        let Some((data, expires_at)) = row else {
            debug!("cache miss");
            return Ok(None);
        };

        if is_expired(&expires_at, Utc::now()) {
            info!(expires_at = %expires_at, "cache entry expired, evicting");
            self.delete_key(&key).await?;
            return Ok(None);
        }

        match serde_json::from_str::<Vec<Artifact>>(&data) {
            Ok(artifacts) => {
                debug!(count = artifacts.len(), "cache hit");
                Ok(Some(artifacts))
            }
            Err(error) => {
                warn!(error = %error, "undecodable cache entry, evicting");
                self.delete_key(&key).await?;
                Ok(None)
            }
        }
    }

    /// Stores `data` under `(category, limit)`, replacing any previous entry
    /// and restarting its lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidLimit`] for a zero limit,
    /// [`CacheError::Encode`] if serialization fails, or
    /// [`CacheError::Database`] if the write fails.
    #[instrument(skip(self, data), fields(key, count = data.len()))]
    pub async fn set(
        &self,
        category: Category,
        limit: usize,
        data: &[Artifact],
    ) -> Result<(), CacheError> {
        if limit == 0 {
            return Err(CacheError::InvalidLimit(limit));
        }
        let key = cache_key(category, limit);
        tracing::Span::current().record("key", key.as_str());

        let encoded = serde_json::to_string(data).map_err(|source| CacheError::Encode {
            key: key.clone(),
            source,
        })?;
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let item_limit = i64::try_from(limit).map_err(|_| CacheError::InvalidLimit(limit))?;
        let item_count = i64::try_from(data.len()).unwrap_or(i64::MAX);

        sqlx::query(
            r"INSERT OR REPLACE INTO artifact_cache
                (cache_key, category, item_limit, data, item_count, created_at, expires_at)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key)
        .bind(category.as_str())
        .bind(item_limit)
        .bind(encoded)
        .bind(item_count)
        .bind(format_timestamp(created_at))
        .bind(format_timestamp(expires_at))
        .execute(self.db.pool())
        .await?;

        info!(expires_at = %format_timestamp(expires_at), "cache entry stored");
        Ok(())
    }

    /// Removes entries.
    ///
    /// * neither argument: every entry
    /// * only `category`: every limit of that category
    /// * both: the single `(category, limit)` entry
    ///
    /// A `limit` without a `category` clears everything.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear(
        &self,
        category: Option<Category>,
        limit: Option<usize>,
    ) -> Result<u64, CacheError> {
        let result = match (category, limit) {
            (Some(category), Some(limit)) => {
                sqlx::query("DELETE FROM artifact_cache WHERE cache_key = ?")
                    .bind(cache_key(category, limit))
                    .execute(self.db.pool())
                    .await?
            }
            (Some(category), None) => {
                sqlx::query("DELETE FROM artifact_cache WHERE category = ?")
                    .bind(category.as_str())
                    .execute(self.db.pool())
                    .await?
            }
            (None, _) => {
                sqlx::query("DELETE FROM artifact_cache")
                    .execute(self.db.pool())
                    .await?
            }
        };
        let removed = result.rows_affected();
        info!(removed, "cache cleared");
        Ok(removed)
    }

    /// Lists every entry with its freshness.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<CacheStatus, CacheError> {
        let rows: Vec<(String, String, i64, String, String, i64)> = sqlx::query_as(
            r"SELECT cache_key, category, item_limit, created_at, expires_at, item_count
              FROM artifact_cache
              ORDER BY cache_key",
        )
        .fetch_all(self.db.pool())
        .await?;

        let now = Utc::now();
        let entries: Vec<CacheEntryStatus> = rows
            .into_iter()
            .map(
                |(key, category, limit, created_at, expires_at, count)| CacheEntryStatus {
                    expired: is_expired(&expires_at, now),
                    key,
                    category,
                    limit,
                    created_at,
                    expires_at,
                    count,
                },
            )
            .collect();

        Ok(CacheStatus {
            entry_count: entries.len(),
            entries,
        })
    }

    /// Deletes every expired entry. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the scan or delete fails.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<u64, CacheError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT cache_key, expires_at FROM artifact_cache")
                .fetch_all(self.db.pool())
                .await?;

        let now = Utc::now();
        let mut removed = 0;
        for (key, expires_at) in rows {
            if is_expired(&expires_at, now) {
                removed += self.delete_key(&key).await?;
            }
        }
        if removed > 0 {
            info!(removed, "expired cache entries removed");
        }
        Ok(removed)
    }

    async fn delete_key(&self, key: &str) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM artifact_cache WHERE cache_key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Missing or malformed expiry timestamps count as expired.
fn is_expired(expires_at: &str, now: DateTime<Utc>) -> bool {
    DateTime::parse_from_rfc3339(expires_at)
        .map_or(true, |expires| now >= expires.with_timezone(&Utc))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ReportRecord;

    fn artifact(n: usize, category: Category) -> Artifact {
        let record = ReportRecord::new(
            format!("Report number {n}"),
            "2024-05-01",
            format!("https://data.test/report/{n}.html"),
            category,
        );
        Artifact::new(format!("https://pdf.dfcfw.com/pdf/H3_{n}_1.pdf"), record)
    }

    async fn store() -> CacheStore {
        CacheStore::new(Database::new_in_memory().await.unwrap())
    }

    async fn expired_store() -> CacheStore {
        CacheStore::with_ttl(Database::new_in_memory().await.unwrap(), Duration::ZERO)
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key(Category::Strategy, 6), "strategy_6");
        assert_eq!(cache_key(Category::Macro, 50), "macro_50");
    }

    #[test]
    fn test_malformed_expiry_is_expired() {
        assert!(is_expired("", Utc::now()));
        assert!(is_expired("not a date", Utc::now()));
        let future = format_timestamp(Utc::now() + chrono::Duration::hours(1));
        assert!(!is_expired(&future, Utc::now()));
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let cache = store().await;
        let data = vec![artifact(1, Category::Strategy), artifact(2, Category::Strategy)];
        cache.set(Category::Strategy, 6, &data).await.unwrap();
        let hit = cache.get(Category::Strategy, 6).await.unwrap();
        assert_eq!(hit, Some(data));
    }

    #[tokio::test]
    async fn test_get_misses_for_other_limit() {
        let cache = store().await;
        cache
            .set(Category::Strategy, 6, &[artifact(1, Category::Strategy)])
            .await
            .unwrap();
        assert!(cache.get(Category::Strategy, 5).await.unwrap().is_none());
        assert!(cache.get(Category::Industry, 6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_never_returned_and_is_evicted() {
        let cache = expired_store().await;
        cache
            .set(Category::Macro, 6, &[artifact(1, Category::Macro)])
            .await
            .unwrap();

        let before = cache.status().await.unwrap();
        assert_eq!(before.entry_count, 1);
        assert!(before.entries[0].expired);

        assert!(cache.get(Category::Macro, 6).await.unwrap().is_none());
        let after = cache.status().await.unwrap();
        assert_eq!(after.entry_count, 0);
    }

    #[tokio::test]
    async fn test_set_replaces_previous_entry() {
        let cache = store().await;
        cache
            .set(Category::Stock, 3, &[artifact(1, Category::Stock)])
            .await
            .unwrap();
        let replacement = vec![artifact(7, Category::Stock)];
        cache.set(Category::Stock, 3, &replacement).await.unwrap();
        assert_eq!(cache.get(Category::Stock, 3).await.unwrap(), Some(replacement));
        assert_eq!(cache.status().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn test_clear_scopes() {
        let cache = store().await;
        for (category, limit) in [
            (Category::Strategy, 6),
            (Category::Strategy, 10),
            (Category::Industry, 6),
            (Category::Macro, 6),
        ] {
            cache.set(category, limit, &[]).await.unwrap();
        }

        assert_eq!(cache.clear(Some(Category::Strategy), Some(10)).await.unwrap(), 1);
        assert_eq!(cache.clear(Some(Category::Strategy), None).await.unwrap(), 1);
        assert_eq!(cache.status().await.unwrap().entry_count, 2);
        assert_eq!(cache.clear(None, None).await.unwrap(), 2);
        assert_eq!(cache.status().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let cache = store().await;
        let data: Vec<Artifact> = (0..4).map(|n| artifact(n, Category::Industry)).collect();
        cache.set(Category::Industry, 6, &data).await.unwrap();

        let status = cache.status().await.unwrap();
        assert_eq!(status.entry_count, 1);
        let entry = &status.entries[0];
        assert_eq!(entry.key, "industry_6");
        assert_eq!(entry.category, "industry");
        assert_eq!(entry.limit, 6);
        assert_eq!(entry.count, 4);
        assert!(!entry.expired);
    }

    #[tokio::test]
    async fn test_cleanup_expired_removes_only_stale_entries() {
        let db = Database::new_in_memory().await.unwrap();
        let fresh = CacheStore::new(db.clone());
        let stale = CacheStore::with_ttl(db, Duration::ZERO);

        fresh.set(Category::Strategy, 6, &[]).await.unwrap();
        stale.set(Category::Macro, 6, &[]).await.unwrap();

        assert_eq!(fresh.cleanup_expired().await.unwrap(), 1);
        let status = fresh.status().await.unwrap();
        assert_eq!(status.entry_count, 1);
        assert_eq!(status.entries[0].key, "strategy_6");
    }

    #[tokio::test]
    async fn test_rejects_zero_limit() {
        let cache = store().await;
        let err = cache.set(Category::Strategy, 0, &[]).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidLimit(0)));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache = store().await;
        cache.set(Category::Stock, 6, &[]).await.unwrap();
        sqlx::query("UPDATE artifact_cache SET data = '{broken' WHERE cache_key = 'stock_6'")
            .execute(cache.db.pool())
            .await
            .unwrap();
        assert!(cache.get(Category::Stock, 6).await.unwrap().is_none());
        assert_eq!(cache.status().await.unwrap().entry_count, 0);
    }
}
