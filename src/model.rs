//! Records that flow through the acquisition pipeline.
//!
//! A [`ReportRecord`] is produced by a type handler, turned into an
//! [`Artifact`] once its binary URL is known, and finally paired with an
//! [`AcquisitionOutcome`] after the download stage.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::{ReportMetadata, extract_metadata};
use crate::validate::Rejection;

/// Report category offered by the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Strategy reports (策略报告).
    Strategy,
    /// Industry research (行业研报).
    Industry,
    /// Macro research (宏观研究).
    Macro,
    /// Single-stock research (个股研报).
    Stock,
}

/// Returned when a category label is not recognized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown report category '{0}' (expected one of: strategy, industry, macro, stock)")]
pub struct UnknownCategory(pub String);

impl Category {
    /// Every category, in presentation order.
    pub const ALL: [Category; 4] = [
        Category::Strategy,
        Category::Industry,
        Category::Macro,
        Category::Stock,
    ];

    /// Stable lowercase label used in cache keys and CLI arguments.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strategy => "strategy",
            Self::Industry => "industry",
            Self::Macro => "macro",
            Self::Stock => "stock",
        }
    }

    /// Human-readable name as shown on the source site.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Strategy => "策略报告",
            Self::Industry => "行业研报",
            Self::Macro => "宏观研究",
            Self::Stock => "个股研报",
        }
    }

    /// Path of the list page relative to the site origin.
    #[must_use]
    pub fn list_path(self) -> &'static str {
        match self {
            Self::Strategy => "/report/strategyreport.jshtml",
            Self::Industry => "/report/industry.jshtml",
            Self::Macro => "/report/macresearch.jshtml",
            Self::Stock => "/report/stock.jshtml",
        }
    }

    /// Storage sub-directory for artifacts of this category.
    #[must_use]
    pub fn directory_name(self) -> &'static str {
        match self {
            Self::Strategy => "策略",
            Self::Industry => "行业",
            Self::Macro => "宏观",
            Self::Stock => "个股",
        }
    }

    /// Infers a category from a list or detail URL.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_lowercase();
        if lower.contains("strategy") {
            Some(Self::Strategy)
        } else if lower.contains("industry") {
            Some(Self::Industry)
        } else if lower.contains("macresearch") || lower.contains("macro") {
            Some(Self::Macro)
        } else if lower.contains("stock") {
            Some(Self::Stock)
        } else {
            None
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strategy" => Ok(Self::Strategy),
            "industry" => Ok(Self::Industry),
            "macro" | "macresearch" => Ok(Self::Macro),
            "stock" => Ok(Self::Stock),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// One report as listed by a type handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub title: String,
    /// `YYYY-MM-DD`, or empty when the source gave no date.
    pub published_date: String,
    /// Absolute detail/binary URL, or an opaque source reference.
    pub detail_reference: String,
    pub category: Category,
}

impl ReportRecord {
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        published_date: impl Into<String>,
        detail_reference: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            title: title.into(),
            published_date: published_date.into(),
            detail_reference: detail_reference.into(),
            category,
        }
    }

    /// Returns the reference parsed as an absolute http(s) URL, if it is one.
    #[must_use]
    pub fn absolute_reference(&self) -> Option<url::Url> {
        url::Url::parse(self.detail_reference.trim())
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
    }
}

/// A report whose binary URL has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub source_url: String,
    pub filename: String,
    pub report: ReportRecord,
    /// Detail page HTML, read once for metadata; never cached.
    #[serde(skip)]
    pub detail_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ReportMetadata>,
}

impl Artifact {
    /// Builds an artifact, deriving its filename from the source URL and title.
    #[must_use]
    pub fn new(source_url: impl Into<String>, report: ReportRecord) -> Self {
        let source_url = source_url.into();
        let filename = crate::storage::artifact_filename(&source_url, &report);
        Self {
            source_url,
            filename,
            report,
            detail_html: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_detail_html(mut self, html: Option<String>) -> Self {
        self.detail_html = html;
        self
    }

    /// Fills in keyword metadata, from the detail HTML when it was kept
    /// and from the title otherwise.
    #[must_use]
    pub fn with_metadata(mut self, source: &str, at: DateTime<Utc>) -> Self {
        self.metadata = Some(
            extract_metadata(&self.report.title, self.detail_html.as_deref(), source).stamped(at),
        );
        self
    }

    /// Referer to present when fetching this artifact: the detail page when
    /// the report carries a real one distinct from the binary itself.
    #[must_use]
    pub fn detail_referer(&self) -> Option<&str> {
        let reference = self.report.detail_reference.trim();
        (reference != self.source_url).then_some(reference)
    }
}

/// Per-artifact progress through a crawl.
///
/// `Pending -> DetailResolved -> UrlResolved -> Downloading -> {Validated | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Pending,
    DetailResolved,
    UrlResolved,
    Downloading,
    Validated,
    Failed,
}

impl ArtifactState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::DetailResolved | Self::UrlResolved | Self::Failed)
                | (Self::DetailResolved, Self::UrlResolved | Self::Failed)
                | (Self::UrlResolved, Self::Downloading)
                | (Self::Downloading, Self::Validated | Self::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Failed)
    }
}

/// Final status of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStatus {
    Success,
    ContentInvalid,
    NetworkFailure,
    Timeout,
}

impl AcquisitionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ContentInvalid => "content_invalid",
            Self::NetworkFailure => "network_failure",
            Self::Timeout => "timeout",
        }
    }
}

/// Result of acquiring one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionOutcome {
    pub artifact: Artifact,
    pub status: AcquisitionStatus,
    pub bytes_written: Option<PathBuf>,
    /// Size of the accepted payload, or of the last rejected one.
    pub bytes_received: usize,
    /// Tier that produced the accepted bytes.
    pub tier: Option<&'static str>,
    /// Last content rejection seen across tiers, for diagnostics.
    pub rejection: Option<Rejection>,
}

impl AcquisitionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == AcquisitionStatus::Success
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_label() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn test_category_accepts_macresearch_alias() {
        assert_eq!("macresearch".parse::<Category>().unwrap(), Category::Macro);
        assert_eq!(" Strategy ".parse::<Category>().unwrap(), Category::Strategy);
    }

    #[test]
    fn test_category_rejects_unknown_label() {
        let err = "profit".parse::<Category>().unwrap_err();
        assert!(err.to_string().contains("profit"));
    }

    #[test]
    fn test_category_from_url() {
        assert_eq!(
            Category::from_url("https://data.eastmoney.com/report/strategyreport.jshtml"),
            Some(Category::Strategy)
        );
        assert_eq!(
            Category::from_url("https://data.eastmoney.com/report/macresearch.jshtml"),
            Some(Category::Macro)
        );
        assert_eq!(Category::from_url("https://example.com/"), None);
    }

    #[test]
    fn test_absolute_reference_rejects_opaque_markers() {
        let record = ReportRecord::new("t", "", "tushare://strategy", Category::Strategy);
        assert!(record.absolute_reference().is_none());
        let record = ReportRecord::new("t", "", "/report/x.html", Category::Strategy);
        assert!(record.absolute_reference().is_none());
        let record = ReportRecord::new("t", "", "https://a.test/x", Category::Strategy);
        assert!(record.absolute_reference().is_some());
    }

    #[test]
    fn test_artifact_detail_html_is_not_serialized() {
        let record = ReportRecord::new("Title", "2024-01-02", "https://a.test/d", Category::Macro);
        let artifact = Artifact::new("https://pdf.test/a.pdf", record)
            .with_detail_html(Some("<html></html>".to_string()));
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(!json.contains("detail_html"));
        let back: Artifact = serde_json::from_str(&json).unwrap();
        assert!(back.detail_html.is_none());
        assert_eq!(back.filename, artifact.filename);
    }

    #[test]
    fn test_metadata_prefers_detail_html_and_survives_cache_payload() {
        let record = ReportRecord::new("半导体月度跟踪", "2024-01-02", "https://a.test/d", Category::Industry);
        let at = Utc::now();
        let fresh = Artifact::new("https://pdf.test/a.pdf", record.clone())
            .with_detail_html(Some(r#"<span class="tag">芯片</span>"#.to_string()))
            .with_metadata("scraped", at);
        let keywords = &fresh.metadata.as_ref().unwrap().keywords;
        assert_eq!(keywords.industries, vec!["半导体".to_string(), "芯片".to_string()]);

        let title_only = Artifact::new("https://pdf.test/a.pdf", record).with_metadata("scraped", at);
        assert_eq!(
            title_only.metadata.as_ref().unwrap().keywords.industries,
            vec!["半导体".to_string()]
        );

        let back: Artifact = serde_json::from_str(&serde_json::to_string(&fresh).unwrap()).unwrap();
        assert_eq!(back.metadata, fresh.metadata);
    }

    #[test]
    fn test_detail_referer_ignores_binary_self_reference() {
        let record = ReportRecord::new("T", "", "https://pdf.test/a.pdf", Category::Stock);
        let artifact = Artifact::new("https://pdf.test/a.pdf", record);
        assert!(artifact.detail_referer().is_none());
    }

    #[test]
    fn test_artifact_state_transitions() {
        assert!(ArtifactState::Pending.can_advance_to(ArtifactState::DetailResolved));
        assert!(ArtifactState::Pending.can_advance_to(ArtifactState::UrlResolved));
        assert!(ArtifactState::UrlResolved.can_advance_to(ArtifactState::Downloading));
        assert!(ArtifactState::Downloading.can_advance_to(ArtifactState::Validated));
        assert!(!ArtifactState::Validated.can_advance_to(ArtifactState::Downloading));
        assert!(!ArtifactState::Pending.can_advance_to(ArtifactState::Downloading));
        assert!(ArtifactState::Failed.is_terminal());
    }
}
