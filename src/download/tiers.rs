//! The acquisition tiers, in the order the downloader tries them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::client::HttpFetcher;
use super::error::DownloadError;
use super::rate_limiter::parse_retry_after;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use crate::session::{ResponseMatcher, Session, SessionBroker, SessionError};

/// Directory (next to the destination) where browser downloads land.
const SCRATCH_DIR: &str = ".incoming";

/// Inputs shared by every tier for one artifact.
#[derive(Debug, Clone, Copy)]
pub struct AcquireRequest<'a> {
    pub source_url: &'a str,
    pub referer: &'a str,
    pub session: &'a Session,
    pub destination: &'a Path,
}

impl AcquireRequest<'_> {
    fn scratch_dir(&self) -> PathBuf {
        self.destination
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SCRATCH_DIR)
    }
}

/// Why a tier produced no bytes.
#[derive(Debug, Error)]
pub enum TierFailure {
    #[error(transparent)]
    Http(#[from] DownloadError),

    #[error(transparent)]
    Browser(#[from] SessionError),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TierFailure {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout(),
            Self::Browser(e) => e.is_timeout(),
            Self::Io { .. } => false,
        }
    }
}

/// One strategy for obtaining an artifact's bytes.
///
/// Tiers return raw bytes; the downloader validates them, so a tier that
/// receives an interstitial page still returns `Ok`.
#[async_trait]
pub trait AcquisitionTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, request: &AcquireRequest<'_>) -> Result<Vec<u8>, TierFailure>;
}

/// Tier 1: navigate the browser and capture the matching response body.
#[derive(Debug, Clone)]
pub struct InterceptTier {
    broker: SessionBroker,
    matcher: ResponseMatcher,
}

impl InterceptTier {
    #[must_use]
    pub fn new(broker: SessionBroker, matcher: ResponseMatcher) -> Self {
        Self { broker, matcher }
    }
}

#[async_trait]
impl AcquisitionTier for InterceptTier {
    fn name(&self) -> &'static str {
        "intercept"
    }

    async fn attempt(&self, request: &AcquireRequest<'_>) -> Result<Vec<u8>, TierFailure> {
        Ok(self
            .broker
            .capture_response(request.source_url, request.referer, self.matcher.clone())
            .await?)
    }
}

/// Tier 2: let the browser download the file and read it back.
#[derive(Debug, Clone)]
pub struct DownloadEventTier {
    broker: SessionBroker,
}

impl DownloadEventTier {
    #[must_use]
    pub fn new(broker: SessionBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl AcquisitionTier for DownloadEventTier {
    fn name(&self) -> &'static str {
        "download_event"
    }

    async fn attempt(&self, request: &AcquireRequest<'_>) -> Result<Vec<u8>, TierFailure> {
        let saved = self
            .broker
            .capture_download(request.source_url, request.referer, request.scratch_dir())
            .await?;
        let bytes = tokio::fs::read(&saved).await.map_err(|source| TierFailure::Io {
            path: saved.clone(),
            source,
        })?;
        if let Err(error) = tokio::fs::remove_file(&saved).await {
            debug!(path = %saved.display(), error = %error, "could not remove scratch download");
        }
        Ok(bytes)
    }
}

/// Tier 3: plain HTTP GET carrying the session's cookies.
///
/// The only tier that does not need the browser, so batch workers use it
/// alone.
#[derive(Debug, Clone)]
pub struct HttpTier {
    fetcher: HttpFetcher,
    retry: RetryPolicy,
}

impl HttpTier {
    #[must_use]
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self::with_retry(fetcher, RetryPolicy::default())
    }

    #[must_use]
    pub fn with_retry(fetcher: HttpFetcher, retry: RetryPolicy) -> Self {
        Self { fetcher, retry }
    }
}

#[async_trait]
impl AcquisitionTier for HttpTier {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, request), fields(url = request.source_url))]
    async fn attempt(&self, request: &AcquireRequest<'_>) -> Result<Vec<u8>, TierFailure> {
        let mut attempt = 1;
        loop {
            let error = match self
                .fetcher
                .fetch(request.source_url, request.referer, request.session)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(error) => error,
            };

            let failure = classify_error(&error);
            match self.retry.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    let delay = match (&error, failure) {
                        (
                            DownloadError::HttpStatus {
                                retry_after: Some(value),
                                ..
                            },
                            FailureType::RateLimited,
                        ) => parse_retry_after(value).unwrap_or(delay),
                        _ => delay,
                    };
                    warn!(
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis(),
                        "retrying HTTP fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "giving up on HTTP fetch");
                    return Err(error.into());
                }
            }
        }
    }
}
