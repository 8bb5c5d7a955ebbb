//! Error types for the crawl orchestrator.

use thiserror::Error;

use crate::cache::CacheError;
use crate::download::DownloadError;
use crate::handler::HandlerError;
use crate::model::UnknownCategory;
use crate::session::SessionError;

use super::pool::PoolError;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid limit {limit}: must be between 1 and {max}")]
    InvalidLimit { limit: usize, max: usize },

    #[error(transparent)]
    UnknownCategory(#[from] UnknownCategory),

    #[error("no report category requested")]
    NoCategories,

    #[error("not an absolute http(s) URL: {0}")]
    InvalidReference(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("browser session failed: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}
