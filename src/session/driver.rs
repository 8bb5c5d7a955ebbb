//! Browser automation seam.
//!
//! [`BrowserDriver`] is the narrow surface the session actor needs from a
//! browser. The production implementation is
//! [`ChromiumDriver`](super::chromium::ChromiumDriver); tests substitute
//! scripted fakes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::cookies::SessionCookie;

/// Errors raised by a browser driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No browser is available in this process.
    #[error("browser unavailable: {0}")]
    Unavailable(String),

    /// The browser could not be started.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Navigation to a URL failed outright.
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// A bounded wait expired.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A DevTools command or script evaluation failed.
    #[error("browser protocol error: {0}")]
    Protocol(String),

    /// Reading a downloaded file failed.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DriverError {
    pub fn navigation(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn protocol(message: impl std::fmt::Display) -> Self {
        Self::Protocol(message.to_string())
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Decides whether an observed network response is the binary being fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMatcher {
    host: String,
}

impl ResponseMatcher {
    #[must_use]
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into().to_lowercase(),
        }
    }

    /// Response URL is on the binary host and its path looks like a PDF.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let on_host = parsed
            .host_str()
            .is_some_and(|host| host.to_lowercase().contains(&self.host));
        let path = parsed.path().to_lowercase();
        on_host && path.contains("pdf")
    }
}

/// Operations the session actor performs against a live browser page.
///
/// Implementations are driven from a single task; they still need to be
/// `Send + Sync` so the actor future can be spawned.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Begins navigating to `url` without waiting for the page to load.
    async fn start_navigation(&self, url: &str) -> Result<(), DriverError>;

    /// Resolves once the current navigation has fully loaded.
    async fn wait_for_load(&self) -> Result<(), DriverError>;

    /// Current `document.readyState`.
    async fn ready_state(&self) -> Result<String, DriverError>;

    /// Whether the current document contains an element matching `selector`.
    async fn has_element(&self, selector: &str) -> Result<bool, DriverError>;

    /// Serialized HTML of the current document.
    async fn page_html(&self) -> Result<String, DriverError>;

    /// Cookies visible to the browser context.
    async fn cookies(&self) -> Result<Vec<SessionCookie>, DriverError>;

    /// Extra headers sent with every subsequent request from the page.
    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), DriverError>;

    /// Navigates to `url` in-page and returns the body of the first response
    /// accepted by `matcher`.
    async fn capture_response(
        &self,
        url: &str,
        matcher: &ResponseMatcher,
        timeout: Duration,
    ) -> Result<Vec<u8>, DriverError>;

    /// Navigates to `url` expecting a file download, saving it under `dir`.
    async fn capture_download(
        &self,
        url: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, DriverError>;

    /// Releases the browser.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Driver used when no browser could be found or launched.
///
/// Every operation fails fast, so browser tiers fall through to plain HTTP
/// and sessions come back empty.
#[derive(Debug, Clone)]
pub struct UnavailableDriver {
    reason: String,
}

impl UnavailableDriver {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> DriverError {
        DriverError::Unavailable(self.reason.clone())
    }
}

#[async_trait]
impl BrowserDriver for UnavailableDriver {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn start_navigation(&self, _url: &str) -> Result<(), DriverError> {
        Err(self.error())
    }

    async fn wait_for_load(&self) -> Result<(), DriverError> {
        Err(self.error())
    }

    async fn ready_state(&self) -> Result<String, DriverError> {
        Err(self.error())
    }

    async fn has_element(&self, _selector: &str) -> Result<bool, DriverError> {
        Err(self.error())
    }

    async fn page_html(&self) -> Result<String, DriverError> {
        Err(self.error())
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, DriverError> {
        Err(self.error())
    }

    async fn set_extra_headers(&self, _headers: &[(String, String)]) -> Result<(), DriverError> {
        Err(self.error())
    }

    async fn capture_response(
        &self,
        _url: &str,
        _matcher: &ResponseMatcher,
        _timeout: Duration,
    ) -> Result<Vec<u8>, DriverError> {
        Err(self.error())
    }

    async fn capture_download(
        &self,
        _url: &str,
        _dir: &Path,
        _timeout: Duration,
    ) -> Result<PathBuf, DriverError> {
        Err(self.error())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher_requires_host_and_pdf_marker() {
        let matcher = ResponseMatcher::for_host("pdf.dfcfw.com");
        assert!(matcher.matches("https://pdf.dfcfw.com/pdf/H3_AP1_1.pdf"));
        assert!(matcher.matches("https://PDF.dfcfw.com/PDF/H3_AP1_1"));
        assert!(!matcher.matches("https://data.eastmoney.com/report/a.pdf"));
        assert!(!matcher.matches("https://pdf.dfcfw.com/js/app.js"));
    }

    #[tokio::test]
    async fn test_unavailable_driver_fails_fast() {
        let driver = UnavailableDriver::new("no chromium on PATH");
        let err = driver.start_navigation("https://x.test").await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(ref r) if r.contains("chromium")));
        assert!(driver.cookies().await.is_err());
        assert!(driver.close().await.is_ok());
    }

    #[test]
    fn test_timeout_classification() {
        assert!(DriverError::timeout("capture", Duration::from_secs(1)).is_timeout());
        assert!(!DriverError::protocol("boom").is_timeout());
    }
}
