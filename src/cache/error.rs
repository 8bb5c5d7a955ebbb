//! Error types for the artifact cache.

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Open(#[from] DbError),

    #[error("failed to encode cache entry {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid cache limit {0}: must be at least 1")]
    InvalidLimit(usize),
}
