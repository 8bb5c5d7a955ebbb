//! Plain HTTP fetching with a browser-like header set.
//!
//! [`HttpFetcher`] replays a [`Session`]'s cookies and presents the same
//! identity as the browser, so it can run from many workers at once without
//! touching the browser context.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER,
    RETRY_AFTER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{
    ACCEPT_DOCUMENT, BODY_PROBE_LEN, CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS,
};
use super::error::DownloadError;
use crate::session::Session;
use crate::site::SiteProfile;
use crate::user_agent::BROWSER_USER_AGENT;
use crate::validate::{PDF_SIGNATURE, looks_like_markup};

/// HTTP client for binary fetches. Cheap to clone; clones share a pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: String,
}

impl HttpFetcher {
    /// Builds a fetcher with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the client cannot be built.
    pub fn new(site: &SiteProfile) -> Result<Self, DownloadError> {
        Self::with_timeout(site, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Builds a fetcher whose requests each time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the client cannot be built.
    pub fn with_timeout(site: &SiteProfile, timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .timeout(timeout)
            .gzip(true)
            .default_headers(browser_headers())
            .build()
            .map_err(DownloadError::Client)?;
        Ok(Self {
            client,
            origin: site.origin().to_string(),
        })
    }

    /// Fetches `url` and returns its body.
    ///
    /// When the first bytes look like a script or HTML page instead of a
    /// binary, streaming stops early and the prefix read so far is returned;
    /// the caller's validator rejects it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for invalid URLs, network failures,
    /// timeouts and non-success statuses.
    #[instrument(skip(self, session), fields(url, referer))]
    pub async fn fetch(
        &self,
        url: &str,
        referer: &str,
        session: &Session,
    ) -> Result<Vec<u8>, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self
            .client
            .get(url)
            .header(REFERER, referer)
            .header(ORIGIN, &self.origin);
        if let Some(cookies) = session.cookie_header_for(url) {
            request = request.header(COOKIE, cookies);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let capacity = response
            .content_length()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        let mut probed = false;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::from_request(url, e))?;
            body.extend_from_slice(&chunk);
            if !probed && body.len() >= BODY_PROBE_LEN {
                probed = true;
                if !body.starts_with(PDF_SIGNATURE) && looks_like_markup(&body) {
                    debug!(bytes = body.len(), "markup body; aborting stream");
                    break;
                }
            }
        }
        debug!(bytes = body.len(), "fetched body");
        Ok(body)
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_DOCUMENT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(super::constants::ACCEPT_LANGUAGE),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    for (name, value) in [
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "cross-site"),
        ("sec-fetch-user", "?1"),
    ] {
        headers.insert(name, HeaderValue::from_static(value));
    }
    headers
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn pdf_bytes(len: usize) -> Vec<u8> {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(len, b'x');
        bytes
    }

    #[test]
    fn test_browser_headers_present() {
        let headers = browser_headers();
        assert_eq!(headers.get(USER_AGENT).unwrap(), BROWSER_USER_AGENT);
        assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
        assert_eq!(
            headers.get(ACCEPT_LANGUAGE).unwrap(),
            "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_referer_and_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdf/a.pdf"))
            .and(header("referer", "https://data.eastmoney.com/report/"))
            .and(header("origin", "https://data.eastmoney.com"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_bytes(2048)))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&SiteProfile::default()).unwrap();
        let body = fetcher
            .fetch(
                &format!("{}/pdf/a.pdf", server.uri()),
                "https://data.eastmoney.com/report/",
                &Session::empty(),
            )
            .await
            .unwrap();
        assert_eq!(body.len(), 2048);
    }

    #[tokio::test]
    async fn test_fetch_aborts_on_markup_prefix() {
        let server = MockServer::start().await;
        let mut page = b"<html><head><script>var challenge = 1;</script>".to_vec();
        page.resize(256 * 1024, b' ');
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(page))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&SiteProfile::default()).unwrap();
        let body = fetcher
            .fetch(&server.uri(), "https://data.eastmoney.com/report/", &Session::empty())
            .await
            .unwrap();
        assert!(body.starts_with(b"<html>"));
        assert_eq!(
            crate::validate::ContentValidator::default().inspect(&body),
            Err(crate::validate::Rejection::AntiBotInterstitial)
        );
    }

    #[tokio::test]
    async fn test_fetch_maps_status_and_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;
        let fetcher = HttpFetcher::new(&SiteProfile::default()).unwrap();
        let error = fetcher
            .fetch(&server.uri(), "https://data.eastmoney.com/report/", &Session::empty())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            DownloadError::HttpStatus { status: 429, retry_after: Some(ref v), .. } if v == "3"
        ));
    }

    #[test]
    fn test_fetch_rejects_invalid_url() {
        let fetcher = HttpFetcher::new(&SiteProfile::default()).unwrap();
        let error = tokio_test::block_on(fetcher.fetch(
            "not a url",
            "https://data.eastmoney.com/report/",
            &Session::empty(),
        ))
        .unwrap_err();
        assert!(matches!(error, DownloadError::InvalidUrl { .. }));
    }
}
