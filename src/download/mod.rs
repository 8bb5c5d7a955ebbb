//! Tiered artifact acquisition.
//!
//! A [`Downloader`] holds an ordered list of [`AcquisitionTier`]s. Each tier
//! is tried in turn; its bytes go through the [`ContentValidator`] and an
//! invalid payload counts as that tier failing. The first valid payload is
//! written to the destination.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use report_crawler::download::{Downloader, HttpFetcher};
//! use report_crawler::session::Session;
//! use report_crawler::{Artifact, Category, ReportRecord, SiteProfile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let site = SiteProfile::default();
//! let downloader = Downloader::http_only(HttpFetcher::new(&site)?, site);
//! let record = ReportRecord::new("策略周报", "2024-01-02", "https://data.eastmoney.com/report/info/AP1.html", Category::Strategy);
//! let artifact = Artifact::new("https://pdf.dfcfw.com/pdf/H3_AP1_1.pdf", record);
//! let outcome = downloader
//!     .acquire(&artifact, Path::new("./reports/a.pdf"), artifact.detail_referer(), &Session::empty())
//!     .await;
//! println!("{}", outcome.status.as_str());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
pub mod rate_limiter;
mod referer;
mod retry;
mod tiers;

use std::path::Path;

use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

pub use client::HttpFetcher;
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, extract_domain, parse_retry_after};
pub use referer::infer_referer;
pub(crate) use retry::classify_http_status;
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use tiers::{
    AcquireRequest, AcquisitionTier, DownloadEventTier, HttpTier, InterceptTier, TierFailure,
};

use crate::model::{AcquisitionOutcome, AcquisitionStatus, Artifact};
use crate::session::{ResponseMatcher, Session, SessionBroker};
use crate::site::SiteProfile;
use crate::validate::{ContentValidator, Rejection};

/// Runs acquisition tiers in order until one yields a valid payload.
pub struct Downloader {
    tiers: Vec<Box<dyn AcquisitionTier>>,
    validator: ContentValidator,
    site: SiteProfile,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("tiers", &self.tier_names())
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    #[must_use]
    pub fn new(tiers: Vec<Box<dyn AcquisitionTier>>, site: SiteProfile) -> Self {
        Self {
            tiers,
            validator: ContentValidator::default(),
            site,
        }
    }

    /// Interception, then triggered download, then plain HTTP.
    #[must_use]
    pub fn standard(broker: SessionBroker, fetcher: HttpFetcher, site: SiteProfile) -> Self {
        let matcher = ResponseMatcher::for_host(site.binary_host());
        Self::new(
            vec![
                Box::new(InterceptTier::new(broker.clone(), matcher)),
                Box::new(DownloadEventTier::new(broker)),
                Box::new(HttpTier::new(fetcher)),
            ],
            site,
        )
    }

    /// Plain HTTP only; safe to share across worker tasks.
    #[must_use]
    pub fn http_only(fetcher: HttpFetcher, site: SiteProfile) -> Self {
        Self::new(vec![Box::new(HttpTier::new(fetcher))], site)
    }

    #[must_use]
    pub fn with_validator(mut self, validator: ContentValidator) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Acquires `artifact` into `destination`.
    ///
    /// Never fails as a whole: every problem is folded into the outcome's
    /// status. With all tiers failed the status is `ContentInvalid` if any
    /// bytes arrived, `Timeout` if every tier timed out, else
    /// `NetworkFailure`.
    #[instrument(skip(self, artifact, session), fields(url = %artifact.source_url, tier))]
    pub async fn acquire(
        &self,
        artifact: &Artifact,
        destination: &Path,
        referer: Option<&str>,
        session: &Session,
    ) -> AcquisitionOutcome {
        let referer = infer_referer(referer, &artifact.source_url, &self.site);
        let request = AcquireRequest {
            source_url: &artifact.source_url,
            referer: &referer,
            session,
            destination,
        };

        let mut received = 0usize;
        let mut all_timeouts = !self.tiers.is_empty();
        let mut rejection: Option<Rejection> = None;

        for tier in &self.tiers {
            let bytes = match tier.attempt(&request).await {
                Ok(bytes) => bytes,
                Err(failure) => {
                    all_timeouts &= failure.is_timeout();
                    debug!(tier = tier.name(), error = %failure, "tier failed");
                    continue;
                }
            };
            all_timeouts = false;
            received = received.max(bytes.len());

            if let Err(reason) = self.validator.inspect(&bytes) {
                warn!(
                    tier = tier.name(),
                    bytes = bytes.len(),
                    rejection = %reason,
                    "tier returned invalid content"
                );
                rejection = Some(reason);
                continue;
            }

            tracing::Span::current().record("tier", tier.name());
            return match write_artifact(destination, &bytes).await {
                Ok(()) => {
                    info!(bytes = bytes.len(), path = %destination.display(), "artifact saved");
                    AcquisitionOutcome {
                        artifact: artifact.clone(),
                        status: AcquisitionStatus::Success,
                        bytes_written: Some(destination.to_path_buf()),
                        bytes_received: bytes.len(),
                        tier: Some(tier.name()),
                        rejection: None,
                    }
                }
                Err(error) => {
                    warn!(error = %error, "could not write artifact");
                    AcquisitionOutcome {
                        artifact: artifact.clone(),
                        status: AcquisitionStatus::NetworkFailure,
                        bytes_written: None,
                        bytes_received: bytes.len(),
                        tier: Some(tier.name()),
                        rejection: None,
                    }
                }
            };
        }

        let status = if received > 0 {
            AcquisitionStatus::ContentInvalid
        } else if all_timeouts {
            AcquisitionStatus::Timeout
        } else {
            AcquisitionStatus::NetworkFailure
        };
        warn!(status = status.as_str(), "all tiers failed");
        AcquisitionOutcome {
            artifact: artifact.clone(),
            status,
            bytes_written: None,
            bytes_received: received,
            tier: None,
            rejection,
        }
    }
}

/// Writes through a `.part` sibling and renames into place.
async fn write_artifact(destination: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }
    let partial = destination.with_extension("part");
    let file = tokio::fs::File::create(&partial)
        .await
        .map_err(|e| DownloadError::io(&partial, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .await
        .map_err(|e| DownloadError::io(&partial, e))?;
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(&partial, e))?;
    tokio::fs::rename(&partial, destination)
        .await
        .map_err(|e| DownloadError::io(destination, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::model::{Category, ReportRecord};

    enum Script {
        Bytes(Vec<u8>),
        Timeout,
        Fail,
    }

    struct ScriptedTier {
        name: &'static str,
        script: Script,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl AcquisitionTier for ScriptedTier {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn attempt(&self, _request: &AcquireRequest<'_>) -> Result<Vec<u8>, TierFailure> {
            self.log.lock().unwrap().push(self.name);
            match &self.script {
                Script::Bytes(bytes) => Ok(bytes.clone()),
                Script::Timeout => Err(DownloadError::timeout("https://x.test").into()),
                Script::Fail => Err(DownloadError::http_status("https://x.test", 404).into()),
            }
        }
    }

    fn downloader(scripts: Vec<(&'static str, Script)>) -> (Downloader, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tiers: Vec<Box<dyn AcquisitionTier>> = scripts
            .into_iter()
            .map(|(name, script)| {
                Box::new(ScriptedTier {
                    name,
                    script,
                    log: Arc::clone(&log),
                }) as Box<dyn AcquisitionTier>
            })
            .collect();
        (Downloader::new(tiers, SiteProfile::default()), log)
    }

    fn artifact() -> Artifact {
        Artifact::new(
            "https://pdf.dfcfw.com/pdf/H3_AP1_1.pdf",
            ReportRecord::new("策略周报", "2024-01-02", "https://data.eastmoney.com/report/info/AP1.html", Category::Strategy),
        )
    }

    fn pdf(len: usize) -> Vec<u8> {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(len, b'0');
        bytes
    }

    #[tokio::test]
    async fn test_invalid_content_falls_through_to_next_tier() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("a.pdf");
        let (downloader, log) = downloader(vec![
            ("intercept", Script::Bytes(b"<html><script>x</script></html>".to_vec())),
            ("download_event", Script::Fail),
            ("http", Script::Bytes(pdf(4096))),
        ]);
        let outcome = downloader
            .acquire(&artifact(), &dest, None, &Session::empty())
            .await;
        assert_eq!(outcome.status, AcquisitionStatus::Success);
        assert_eq!(outcome.tier, Some("http"));
        assert_eq!(*log.lock().unwrap(), vec!["intercept", "download_event", "http"]);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        assert!(!dest.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_first_valid_tier_stops_iteration() {
        let dir = tempfile::TempDir::new().unwrap();
        let (downloader, log) = downloader(vec![
            ("intercept", Script::Bytes(pdf(2048))),
            ("http", Script::Bytes(pdf(4096))),
        ]);
        let outcome = downloader
            .acquire(&artifact(), &dir.path().join("a.pdf"), None, &Session::empty())
            .await;
        assert!(outcome.is_success());
        assert_eq!(*log.lock().unwrap(), vec!["intercept"]);
    }

    #[tokio::test]
    async fn test_received_bytes_make_content_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        let (downloader, _) = downloader(vec![
            ("intercept", Script::Timeout),
            ("http", Script::Bytes(pdf(100))),
        ]);
        let outcome = downloader
            .acquire(&artifact(), &dir.path().join("a.pdf"), None, &Session::empty())
            .await;
        assert_eq!(outcome.status, AcquisitionStatus::ContentInvalid);
        assert_eq!(outcome.rejection, Some(Rejection::TooShort));
        assert!(outcome.bytes_written.is_none());
    }

    #[tokio::test]
    async fn test_all_timeouts_is_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let (downloader, _) = downloader(vec![("a", Script::Timeout), ("b", Script::Timeout)]);
        let outcome = downloader
            .acquire(&artifact(), &dir.path().join("a.pdf"), None, &Session::empty())
            .await;
        assert_eq!(outcome.status, AcquisitionStatus::Timeout);
    }

    #[tokio::test]
    async fn test_mixed_failures_are_network_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let (downloader, _) = downloader(vec![("a", Script::Timeout), ("b", Script::Fail)]);
        let outcome = downloader
            .acquire(&artifact(), &dir.path().join("a.pdf"), None, &Session::empty())
            .await;
        assert_eq!(outcome.status, AcquisitionStatus::NetworkFailure);
    }

    #[test]
    fn test_standard_tier_order() {
        let site = SiteProfile::default();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let broker = SessionBroker::spawn(
            Box::new(crate::session::UnavailableDriver::new("test")),
            crate::session::BrokerConfig::for_site(&site),
        );
        let downloader = Downloader::standard(broker, HttpFetcher::new(&site).unwrap(), site);
        assert_eq!(downloader.tier_names(), vec!["intercept", "download_event", "http"]);
    }
}
