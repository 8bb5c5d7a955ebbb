//! Handlers backed by structured data sources instead of list pages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::error::{HandlerError, SourceError};
use super::{HandlerKind, SourceReference, TypeHandler};
use crate::download::{RetryDecision, RetryPolicy};
use crate::model::{Category, ReportRecord};
use crate::parser::extract_date;

/// One row returned by a structured source, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub title: String,
    pub date: String,
    pub reference: String,
}

impl SourceRecord {
    pub fn new(
        title: impl Into<String>,
        date: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            date: date.into(),
            reference: reference.into(),
        }
    }
}

/// A structured data source: one call returns a category's newest reports.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Short lowercase name, also the scheme of the handler's opaque marker.
    fn name(&self) -> &'static str;

    async fn fetch(&self, category: Category, limit: usize)
    -> Result<Vec<SourceRecord>, SourceError>;
}

/// Lists a category by calling a [`ReportSource`].
///
/// Transient and quota failures are retried under the handler's
/// [`RetryPolicy`]; once attempts run out the category fails as a whole.
#[derive(Clone)]
pub struct StructuredApiHandler {
    category: Category,
    source: Arc<dyn ReportSource>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StructuredApiHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredApiHandler")
            .field("category", &self.category)
            .field("source", &self.source.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl StructuredApiHandler {
    #[must_use]
    pub fn new(category: Category, source: Arc<dyn ReportSource>) -> Self {
        Self::with_retry(category, source, RetryPolicy::default())
    }

    #[must_use]
    pub fn with_retry(category: Category, source: Arc<dyn ReportSource>, retry: RetryPolicy) -> Self {
        Self {
            category,
            source,
            retry,
        }
    }

    async fn fetch_with_retry(&self, limit: usize) -> Result<Vec<SourceRecord>, SourceError> {
        let mut attempt = 1;
        loop {
            let error = match self.source.fetch(self.category, limit).await {
                Ok(rows) => return Ok(rows),
                Err(error) => error,
            };
            match self.retry.should_retry(error.failure_type(), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        source = self.source.name(),
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying structured source"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(reason = %reason, "giving up on structured source");
                    return Err(error);
                }
            }
        }
    }
}

#[async_trait]
impl TypeHandler for StructuredApiHandler {
    fn name(&self) -> &'static str {
        self.source.name()
    }

    fn category(&self) -> Category {
        self.category
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::StructuredApi
    }

    fn source_reference(&self) -> SourceReference {
        SourceReference::Opaque(format!("{}://{}", self.source.name(), self.category))
    }

    /// `raw_input` is ignored.
    #[instrument(skip(self, _raw_input), fields(source = self.source.name(), category = %self.category))]
    async fn list(
        &self,
        _raw_input: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReportRecord>, HandlerError> {
        let rows = self
            .fetch_with_retry(limit)
            .await
            .map_err(|source| HandlerError::Source {
                category: self.category,
                source,
            })?;
        let records: Vec<ReportRecord> = rows
            .into_iter()
            .filter_map(|row| normalize(row, self.category))
            .take(limit)
            .collect();
        info!(count = records.len(), "structured source listed reports");
        Ok(records)
    }
}

/// Trims the row; references that are not absolute http(s) URLs become
/// empty and are skipped later. Rows without a title are dropped.
fn normalize(row: SourceRecord, category: Category) -> Option<ReportRecord> {
    let title = row.title.trim();
    if title.is_empty() || title.eq_ignore_ascii_case("nan") {
        return None;
    }
    let reference = row.reference.trim();
    let reference = if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        if !reference.is_empty() {
            debug!(reference, "dropping non-URL reference");
        }
        String::new()
    };
    let date = extract_date(&row.date).unwrap_or_default();
    Some(ReportRecord::new(title, date, reference, category))
}
