//! Token-authenticated tabular report API.
//!
//! Responses are `{fields, items}` tables whose column names vary between
//! API revisions, so title/date/url columns are picked by keyword.
//! The free tier allows two calls a minute; calls are paced and quota
//! messages surface as [`SourceError::RateLimited`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::error::SourceError;
use super::structured::{ReportSource, SourceRecord};
use crate::download::RateLimiter;
use crate::model::Category;
use crate::user_agent::api_user_agent;

const DEFAULT_BASE_URL: &str = "https://api.tushare.pro";
const API_NAME: &str = "report_rc";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Free tier: at most two calls per minute.
const MIN_INTERVAL: Duration = Duration::from_secs(35);

const TITLE_KEYWORDS: &[&str] = &["title", "name", "名称", "标题"];
const DATE_KEYWORDS: &[&str] = &["date", "time", "日期", "时间"];
const URL_KEYWORDS: &[&str] = &["url", "link", "href", "链接"];
const QUOTA_MARKERS: &[&str] = &["每分钟最多访问", "rate limit"];

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Table>,
}

#[derive(Debug, Default, Deserialize)]
struct Table {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

/// Column indices chosen for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ColumnMap {
    title: Option<usize>,
    date: Option<usize>,
    url: Option<usize>,
}

pub struct TushareSource {
    client: Client,
    base_url: String,
    token: String,
    limiter: RateLimiter,
}

impl std::fmt::Debug for TushareSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TushareSource")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("min_interval", &self.limiter.interval())
            .finish_non_exhaustive()
    }
}

impl TushareSource {
    /// # Errors
    ///
    /// Returns [`SourceError::MissingToken`] for an empty token or
    /// [`SourceError::Client`] if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>) -> Result<Self, SourceError> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// # Errors
    ///
    /// Same as [`TushareSource::new`].
    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SourceError::MissingToken("tushare"));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(api_user_agent())
            .build()
            .map_err(SourceError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            limiter: RateLimiter::new(MIN_INTERVAL),
        })
    }

    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.limiter = RateLimiter::new(interval);
        self
    }
}

#[async_trait]
impl ReportSource for TushareSource {
    fn name(&self) -> &'static str {
        "tushare"
    }

    #[instrument(skip(self), fields(source = "tushare"))]
    async fn fetch(
        &self,
        category: Category,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let url = self.base_url.clone();
        self.limiter.acquire(&url).await;

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "api_name": API_NAME,
                "token": self.token,
                "params": { "limit": limit },
                "fields": "",
            }))
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

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| SourceError::decode(&url, e.to_string()))?;
        if body.code != 0 {
            let message = body.msg.unwrap_or_default();
            return Err(if is_quota_message(&message) {
                SourceError::RateLimited {
                    source_name: "tushare",
                    message,
                }
            } else {
                SourceError::Api {
                    source_name: "tushare",
                    code: body.code,
                    message,
                }
            });
        }

        let table = body.data.unwrap_or_default();
        if table.items.is_empty() {
            warn!(%category, "tushare returned no rows");
            return Ok(Vec::new());
        }
        let columns = map_columns(&table);
        debug!(fields = ?table.fields, ?columns, rows = table.items.len(), "column mapping");

        Ok(table
            .items
            .iter()
            .take(limit)
            .map(|row| {
                let cell = |index: Option<usize>| {
                    index
                        .and_then(|i| row.get(i))
                        .map(value_text)
                        .unwrap_or_default()
                };
                SourceRecord::new(cell(columns.title), cell(columns.date), cell(columns.url))
            })
            .collect())
    }
}

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn find_column(fields: &[String], keywords: &[&str]) -> Option<usize> {
    fields.iter().position(|field| {
        let lower = field.to_lowercase();
        keywords.iter().any(|k| lower.contains(k))
    })
}

/// Picks title, date and url columns.
///
/// Title falls back to the first column when its first value looks like
/// text; date falls back to the second column when it holds `YYYYMMDD`.
/// The url column must both match a keyword and hold an http(s) value in
/// the first row, so date-like fields are never mistaken for links.
fn map_columns(table: &Table) -> ColumnMap {
    let first_row = table.items.first();
    let sample = |index: usize| {
        first_row
            .and_then(|row| row.get(index))
            .map(value_text)
            .unwrap_or_default()
    };

    let title = find_column(&table.fields, TITLE_KEYWORDS).or_else(|| {
        let text = sample(0);
        (!table.fields.is_empty()
            && text.chars().count() > 5
            && !text.chars().all(|c| c.is_ascii_digit()))
        .then_some(0)
    });

    let date = find_column(&table.fields, DATE_KEYWORDS).or_else(|| {
        let text = sample(1);
        (table.fields.len() > 1 && text.len() == 8 && text.chars().all(|c| c.is_ascii_digit()))
            .then_some(1)
    });

    let url = table.fields.iter().enumerate().find_map(|(index, field)| {
        let lower = field.to_lowercase();
        let named = URL_KEYWORDS.iter().any(|k| lower.contains(k));
        let value = sample(index);
        (named && (value.starts_with("http://") || value.starts_with("https://"))).then_some(index)
    });

    ColumnMap { title, date, url }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn table(fields: &[&str], items: Value) -> Table {
        Table {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            items: serde_json::from_value(items).unwrap(),
        }
    }

    #[test]
    fn test_keyword_columns() {
        let t = table(
            &["ts_code", "trade_date", "title", "report_url"],
            json!([["000001.SZ", "20240102", "银行业季度跟踪", "https://a.test/r.pdf"]]),
        );
        assert_eq!(
            map_columns(&t),
            ColumnMap {
                title: Some(2),
                date: Some(1),
                url: Some(3)
            }
        );
    }

    #[test]
    fn test_positional_fallbacks() {
        let t = table(
            &["col_a", "col_b"],
            json!([["宏观经济月度观察", "20240105"]]),
        );
        assert_eq!(
            map_columns(&t),
            ColumnMap {
                title: Some(0),
                date: Some(1),
                url: None
            }
        );
    }

    #[test]
    fn test_url_column_requires_url_value() {
        let t = table(
            &["title", "link_date"],
            json!([["策略周报第一期", "20240102"]]),
        );
        let columns = map_columns(&t);
        assert_eq!(columns.url, None);
        assert_eq!(columns.date, Some(1));
    }

    #[test]
    fn test_quota_messages() {
        assert!(is_quota_message("抱歉，您每分钟最多访问该接口2次"));
        assert!(is_quota_message("Rate limit exceeded"));
        assert!(!is_quota_message("token invalid"));
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            TushareSource::new("  ").unwrap_err(),
            SourceError::MissingToken("tushare")
        ));
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!(null)), "");
        assert_eq!(value_text(&json!(20_240_102)), "20240102");
        assert_eq!(value_text(&json!("x")), "x");
    }
}
