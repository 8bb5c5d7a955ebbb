//! List-page and detail-page parsing.
//!
//! Both extractions run an ordered table of heuristics
//! ([`LIST_HEURISTICS`], [`DETAIL_HEURISTICS`]); the first heuristic that
//! yields a result wins and the rest are skipped. Finding nothing is a
//! normal outcome, reported as an empty result rather than an error.
//!
//! # Example
//!
//! ```
//! use report_crawler::parser::Parser;
//! use report_crawler::{Category, SiteProfile};
//!
//! let parser = Parser::new(SiteProfile::default());
//! let html = r#"<table class="table-model"><tbody>
//!   <tr><td>1</td><td><a href="/report/info/AP1.html">2024年度策略展望报告</a></td><td>2024-01-02</td></tr>
//! </tbody></table>"#;
//! let records = parser.parse_list(html, Category::Strategy, 6);
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].published_date, "2024-01-02");
//! ```

mod date;
mod detail;
mod list;
mod metadata;

pub use date::{extract_date, today};
pub use detail::{DETAIL_HEURISTICS, DetailHeuristic, LinkFinder};
pub use list::{LIST_HEURISTICS, ListHeuristic, RowFinder};
pub use metadata::{Keywords, ReportMetadata, extract_metadata};

use scraper::Html;
use tracing::{debug, info, instrument};

use crate::model::{Category, ReportRecord};
use crate::site::SiteProfile;

/// Records found on a list page and the heuristic that found them.
#[derive(Debug, Clone, Default)]
pub struct ListExtraction {
    pub heuristic: Option<&'static str>,
    pub records: Vec<ReportRecord>,
}

/// A resolved binary link and the heuristic that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailLink {
    pub url: String,
    pub heuristic: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct Parser {
    site: SiteProfile,
}

impl Parser {
    #[must_use]
    pub fn new(site: SiteProfile) -> Self {
        Self { site }
    }

    #[must_use]
    pub fn site(&self) -> &SiteProfile {
        &self.site
    }

    /// Extracts up to `limit` report records from a list page.
    #[must_use]
    pub fn parse_list(&self, html: &str, category: Category, limit: usize) -> Vec<ReportRecord> {
        self.extract_list(html, category, limit).records
    }

    /// Like [`Parser::parse_list`] but also reports which heuristic matched.
    #[must_use]
    #[instrument(skip(self, html), fields(html_len = html.len()))]
    pub fn extract_list(&self, html: &str, category: Category, limit: usize) -> ListExtraction {
        if limit == 0 {
            return ListExtraction::default();
        }
        let document = Html::parse_document(html);

        for heuristic in &LIST_HEURISTICS {
            let rows = (heuristic.find)(&document, &self.site, limit);
            if rows.is_empty() {
                debug!(heuristic = heuristic.name, "no rows");
                continue;
            }
            let records: Vec<ReportRecord> = rows
                .into_iter()
                .filter_map(|row| list::record_from_row(row, &self.site, category))
                .take(limit)
                .collect();
            info!(
                heuristic = heuristic.name,
                count = records.len(),
                "extracted report rows"
            );
            return ListExtraction {
                heuristic: Some(heuristic.name),
                records,
            };
        }

        info!("no report rows found on list page");
        ListExtraction::default()
    }

    /// Resolves the binary URL on a detail page, completed to an absolute URL.
    #[must_use]
    #[instrument(skip(self, html), fields(html_len = html.len()))]
    pub fn extract_detail_link(&self, html: &str) -> Option<DetailLink> {
        let document = Html::parse_document(html);
        for heuristic in &DETAIL_HEURISTICS {
            let Some(href) = (heuristic.find)(&document, &self.site) else {
                continue;
            };
            let Some(url) = self.site.complete_url(&href) else {
                debug!(heuristic = heuristic.name, href = %href, "unusable href");
                continue;
            };
            debug!(heuristic = heuristic.name, url = %url, "resolved binary link");
            return Some(DetailLink {
                url,
                heuristic: heuristic.name,
            });
        }
        info!("no binary link found on detail page");
        None
    }
}
