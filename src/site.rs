//! Constants describing the report source site.
//!
//! Everything the parser, session broker and downloader know about the
//! remote site lives here so tests can point the pipeline at a mock origin.

use url::Url;

use crate::model::Category;

/// Default site origin.
pub const DEFAULT_ORIGIN: &str = "https://data.eastmoney.com";

/// Host serving report binaries.
pub const DEFAULT_BINARY_HOST: &str = "pdf.dfcfw.com";

/// Column header labelling the report-name column on list pages.
pub const DEFAULT_REPORT_NAME_HEADER: &str = "报告名称";

/// Class marking the binary link on detail pages.
pub const DEFAULT_PDF_LINK_CLASS: &str = "pdf-link";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    origin: String,
    binary_host: String,
    report_name_header: String,
    pdf_link_class: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            binary_host: DEFAULT_BINARY_HOST.to_string(),
            report_name_header: DEFAULT_REPORT_NAME_HEADER.to_string(),
            pdf_link_class: DEFAULT_PDF_LINK_CLASS.to_string(),
        }
    }
}

impl SiteProfile {
    /// Profile for the default site with a different origin (e.g. a mock server).
    #[must_use]
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_binary_host(mut self, host: impl Into<String>) -> Self {
        self.binary_host = host.into();
        self
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn binary_host(&self) -> &str {
        &self.binary_host
    }

    #[must_use]
    pub fn report_name_header(&self) -> &str {
        &self.report_name_header
    }

    #[must_use]
    pub fn pdf_link_class(&self) -> &str {
        &self.pdf_link_class
    }

    /// Category-independent report index, used as the bootstrap page and
    /// as the fallback referer.
    #[must_use]
    pub fn report_index(&self) -> String {
        format!("{}/report/", self.origin)
    }

    #[must_use]
    pub fn list_url(&self, category: Category) -> String {
        format!("{}{}", self.origin, category.list_path())
    }

    /// Whether `url` points straight at a report binary.
    #[must_use]
    pub fn is_binary_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.contains(&self.binary_host) && lower.contains("pdf")
    }

    /// Completes a list/detail href into an absolute URL.
    ///
    /// `/path` is joined to the origin; other relative hrefs are joined to
    /// the report index. Returns `None` for empty or script hrefs.
    #[must_use]
    pub fn complete_url(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(href.to_string());
        }
        if let Some(rest) = href.strip_prefix("//") {
            return Some(format!("https://{rest}"));
        }
        if href.starts_with('/') {
            return Some(format!("{}{href}", self.origin));
        }
        let base = Url::parse(&self.report_index()).ok()?;
        base.join(href).ok().map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        let site = SiteProfile::default();
        assert_eq!(site.report_index(), "https://data.eastmoney.com/report/");
        assert_eq!(
            site.list_url(Category::Industry),
            "https://data.eastmoney.com/report/industry.jshtml"
        );
    }

    #[test]
    fn test_with_origin_trims_trailing_slash() {
        let site = SiteProfile::with_origin("http://127.0.0.1:9000/");
        assert_eq!(site.report_index(), "http://127.0.0.1:9000/report/");
    }

    #[test]
    fn test_complete_url_rules() {
        let site = SiteProfile::default();
        assert_eq!(
            site.complete_url("/report/info/AP1.html").as_deref(),
            Some("https://data.eastmoney.com/report/info/AP1.html")
        );
        assert_eq!(
            site.complete_url("info/AP2.html").as_deref(),
            Some("https://data.eastmoney.com/report/info/AP2.html")
        );
        assert_eq!(
            site.complete_url("https://other.test/x").as_deref(),
            Some("https://other.test/x")
        );
        assert_eq!(
            site.complete_url("//pdf.dfcfw.com/pdf/a.pdf").as_deref(),
            Some("https://pdf.dfcfw.com/pdf/a.pdf")
        );
        assert_eq!(site.complete_url("javascript:void(0)"), None);
        assert_eq!(site.complete_url("  "), None);
    }

    #[test]
    fn test_is_binary_url() {
        let site = SiteProfile::default();
        assert!(site.is_binary_url("https://pdf.dfcfw.com/pdf/H3_AP1_1.pdf"));
        assert!(!site.is_binary_url("https://data.eastmoney.com/report/info/AP1.html"));
    }
}
