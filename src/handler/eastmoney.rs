//! The site's own JSON report API.
//!
//! Returns report rows with an `infoCode`, from which the binary URL is
//! built directly, so these records skip the detail-page fetch.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::error::SourceError;
use super::structured::{ReportSource, SourceRecord};
use crate::download::RateLimiter;
use crate::model::Category;
use crate::site::DEFAULT_BINARY_HOST;
use crate::user_agent::BROWSER_USER_AGENT;

const DEFAULT_BASE_URL: &str = "https://reportapi.eastmoney.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct ReportListResponse {
    #[serde(default)]
    data: Option<Vec<ReportRow>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    publish_date: String,
    #[serde(default)]
    info_code: String,
}

pub struct EastmoneyApiSource {
    client: Client,
    base_url: String,
    binary_host: String,
    limiter: RateLimiter,
}

impl std::fmt::Debug for EastmoneyApiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EastmoneyApiSource")
            .field("base_url", &self.base_url)
            .field("binary_host", &self.binary_host)
            .finish_non_exhaustive()
    }
}

impl EastmoneyApiSource {
    /// # Errors
    ///
    /// Returns [`SourceError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Source pointed at another API root (a mock server in tests).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Client`] if the HTTP client cannot be built.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(SourceError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            binary_host: DEFAULT_BINARY_HOST.to_string(),
            limiter: RateLimiter::new(MIN_INTERVAL),
        })
    }

    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.limiter = RateLimiter::new(interval);
        self
    }

    fn binary_url(&self, info_code: &str) -> String {
        format!("https://{}/pdf/H3_{info_code}_1.pdf", self.binary_host)
    }
}

/// Endpoint path and `qType` for a category.
fn endpoint(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Stock => ("report/list", "0"),
        Category::Industry => ("report/list", "1"),
        Category::Strategy => ("report/jg", "2"),
        Category::Macro => ("report/jg", "3"),
    }
}

#[async_trait]
impl ReportSource for EastmoneyApiSource {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    #[instrument(skip(self), fields(source = "eastmoney"))]
    async fn fetch(
        &self,
        category: Category,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let (path, q_type) = endpoint(category);
        let url = format!("{}/{path}", self.base_url);
        let page_size = limit.to_string();

        self.limiter.acquire(&url).await;
        let response = self
            .client
            .get(&url)
            .query(&[
                ("pageNo", "1"),
                ("pageSize", page_size.as_str()),
                ("qType", q_type),
                ("industryCode", "*"),
                ("rating", "*"),
                ("beginTime", ""),
                ("endTime", ""),
                ("fields", ""),
            ])
            .send()
            .await
            .map_err(|e| SourceError::network(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let body: ReportListResponse = response
            .json()
            .await
            .map_err(|e| SourceError::decode(&url, e.to_string()))?;
        let rows = body.data.unwrap_or_default();
        debug!(rows = rows.len(), "report API responded");

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| {
                let reference = if row.info_code.trim().is_empty() {
                    String::new()
                } else {
                    self.binary_url(row.info_code.trim())
                };
                SourceRecord::new(row.title, row.publish_date, reference)
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_per_category() {
        assert_eq!(endpoint(Category::Stock), ("report/list", "0"));
        assert_eq!(endpoint(Category::Macro), ("report/jg", "3"));
    }

    #[test]
    fn test_binary_url_from_info_code() {
        let source = EastmoneyApiSource::new().unwrap();
        assert_eq!(
            source.binary_url("AP202401021617140938"),
            "https://pdf.dfcfw.com/pdf/H3_AP202401021617140938_1.pdf"
        );
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let body: ReportListResponse =
            serde_json::from_str(r#"{"data":[{"title":"t"}],"hits":1}"#).unwrap();
        let rows = body.data.unwrap();
        assert_eq!(rows[0].title, "t");
        assert!(rows[0].info_code.is_empty());
        let empty: ReportListResponse = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert!(empty.data.is_none());
    }
}
