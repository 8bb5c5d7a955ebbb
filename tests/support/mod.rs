//! Shared fixtures for integration tests: a scripted browser, PDF payloads
//! and a site profile whose binary host is the local mock server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use report_crawler::SiteProfile;
use wiremock::MockServer;
use report_crawler::session::{
    BrokerConfig, BrowserDriver, DriverError, ResponseMatcher, SessionBroker, SessionCookie,
};

/// Browser double serving fixed pages by URL.
///
/// Navigating to an unknown URL fails. Every navigation and capture is
/// recorded so tests can assert on browser traffic.
#[derive(Default)]
pub struct FakeBrowser {
    pages: HashMap<String, String>,
    intercept: Option<Vec<u8>>,
    log: Arc<Mutex<Vec<String>>>,
    current: Mutex<Option<String>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    /// Bytes returned by the in-page response capture.
    pub fn intercepting(mut self, bytes: Vec<u8>) -> Self {
        self.intercept = Some(bytes);
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start_navigation(&self, url: &str) -> Result<(), DriverError> {
        self.log.lock().unwrap().push(format!("nav {url}"));
        if !self.pages.contains_key(url) {
            return Err(DriverError::navigation(url, "net::ERR_NAME_NOT_RESOLVED"));
        }
        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_load(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn ready_state(&self) -> Result<String, DriverError> {
        Ok("complete".to_string())
    }

    async fn has_element(&self, _selector: &str) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn page_html(&self) -> Result<String, DriverError> {
        let current = self.current.lock().unwrap().clone().unwrap_or_default();
        self.pages
            .get(&current)
            .cloned()
            .ok_or_else(|| DriverError::protocol("no document loaded"))
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, DriverError> {
        Ok(vec![SessionCookie::new("qgqp_b_id", "fake", "127.0.0.1", "/", false)])
    }

    async fn set_extra_headers(&self, _headers: &[(String, String)]) -> Result<(), DriverError> {
        Ok(())
    }

    async fn capture_response(
        &self,
        url: &str,
        _matcher: &ResponseMatcher,
        timeout: Duration,
    ) -> Result<Vec<u8>, DriverError> {
        self.log.lock().unwrap().push(format!("intercept {url}"));
        self.intercept
            .clone()
            .ok_or_else(|| DriverError::timeout("response capture", timeout))
    }

    async fn capture_download(
        &self,
        url: &str,
        _dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, DriverError> {
        self.log.lock().unwrap().push(format!("download {url}"));
        Err(DriverError::timeout("download", timeout))
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Set to `1` to fail, instead of skip, mock-server tests where binding
/// localhost is not allowed.
const REQUIRE_SOCKETS_ENV: &str = "REPORT_CRAWLER_REQUIRE_SOCKET_TESTS";

/// Starts a mock server, or returns `None` (after a note on stderr) when the
/// sandbox forbids localhost sockets.
pub async fn mock_server_or_skip() -> Option<MockServer> {
    match TcpListener::bind("127.0.0.1:0") {
        Ok(_) => Some(MockServer::start().await),
        Err(error) => {
            let required = std::env::var(REQUIRE_SOCKETS_ENV)
                .is_ok_and(|v| matches!(v.trim(), "1" | "true" | "yes"));
            assert!(
                !required,
                "localhost bind failed ({error}) and {REQUIRE_SOCKETS_ENV} is set"
            );
            eprintln!("skipping mock-server test: localhost bind failed ({error})");
            None
        }
    }
}

/// Default site whose binaries are served from the local mock server.
pub fn mock_site() -> SiteProfile {
    SiteProfile::default().with_binary_host("127.0.0.1")
}

pub fn spawn_broker(driver: FakeBrowser, site: &SiteProfile) -> SessionBroker {
    let config = BrokerConfig::for_site(site)
        .without_delays()
        .with_navigation_timeout(Duration::from_secs(1));
    SessionBroker::spawn(Box::new(driver), config)
}

/// A PDF-looking payload of `len` bytes.
pub fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(len.max(bytes.len()), b'0');
    bytes
}

/// Interstitial page the portal serves instead of a binary.
pub fn interstitial_html() -> Vec<u8> {
    let mut page = b"<!DOCTYPE html><html><head><script>var _0x1=\"verify\";</script></head><body>"
        .to_vec();
    page.resize(4096, b' ');
    page.extend_from_slice(b"</body></html>");
    page
}

/// A `table.table-model` list page linking to `hrefs`.
pub fn list_page(hrefs: &[(&str, &str)]) -> String {
    let rows: String = hrefs
        .iter()
        .enumerate()
        .map(|(i, (title, href))| {
            format!(
                r#"<tr><td>{}</td><td><a href="{href}">{title}</a></td><td>2024-03-0{}</td></tr>"#,
                i + 1,
                (i % 9) + 1
            )
        })
        .collect();
    format!(r#"<html><body><table class="table-model"><tbody>{rows}</tbody></table></body></html>"#)
}

pub fn detail_page(pdf_url: &str) -> String {
    format!(r#"<html><body><a class="pdf-link" href="{pdf_url}">查看PDF原文</a></body></html>"#)
}
