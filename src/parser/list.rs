//! Report-row extraction from list pages.
//!
//! Three row finders are tried in [`LIST_HEURISTICS`] order; the first that
//! returns any rows wins. Rows are then turned into [`ReportRecord`]s.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::date::{date_from_cells, extract_date, today};
use crate::model::{Category, ReportRecord};
use crate::site::SiteProfile;

/// Minimum link-text length (chars) for a link to count as a report title.
pub(crate) const MIN_TITLE_CHARS: usize = 6;

const SERIAL_HEADER: &str = "序号";

/// Finds candidate report rows in a document.
pub type RowFinder = for<'a> fn(&'a Html, &SiteProfile, usize) -> Vec<ElementRef<'a>>;

/// A named row-finding strategy.
#[derive(Clone, Copy)]
pub struct ListHeuristic {
    pub name: &'static str,
    pub find: RowFinder,
}

impl std::fmt::Debug for ListHeuristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListHeuristic").field("name", &self.name).finish()
    }
}

/// Row finders in the order they are attempted.
pub const LIST_HEURISTICS: [ListHeuristic; 3] = [
    ListHeuristic {
        name: "structural",
        find: structural_rows,
    },
    ListHeuristic {
        name: "header_column",
        find: header_column_rows,
    },
    ListHeuristic {
        name: "generic_rows",
        find: generic_rows,
    },
];

macro_rules! static_selector {
    ($name:ident, $css:expr) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("static selector is valid"));
    };
}

static_selector!(STRUCTURAL_LINKS, "table.table-model tbody tr td:nth-child(2) a");
static_selector!(FLOATHEAD_TABLES, "table.floathead");
static_selector!(TABLES, "table");
static_selector!(HEADER_CELLS, "thead th, thead td");
static_selector!(BODY_ROWS, "tbody tr");
static_selector!(ALL_ROWS, "tr");
static_selector!(LINKS, "a[href]");

/// (a) Known markup: second column of `table.table-model`.
fn structural_rows<'a>(doc: &'a Html, _site: &SiteProfile, limit: usize) -> Vec<ElementRef<'a>> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for link in doc.select(&STRUCTURAL_LINKS) {
        let Some(row) = enclosing_row(link) else {
            continue;
        };
        if seen.insert(row.id()) {
            rows.push(row);
            if rows.len() >= limit {
                break;
            }
        }
    }
    rows
}

/// (b) Locate the report-name column by its header text, then read that
/// column from each body row.
fn header_column_rows<'a>(doc: &'a Html, site: &SiteProfile, limit: usize) -> Vec<ElementRef<'a>> {
    let mut tables: Vec<ElementRef<'a>> = doc.select(&FLOATHEAD_TABLES).collect();
    if tables.is_empty() {
        tables = doc.select(&TABLES).collect();
    }

    let mut rows = Vec::new();
    for table in tables {
        let Some(column) = table
            .select(&HEADER_CELLS)
            .position(|cell| normalized_text(cell).contains(site.report_name_header()))
        else {
            continue;
        };

        for row in table.select(&BODY_ROWS) {
            let has_titled_link = cells(row).get(column).is_some_and(|cell| {
                cell.select(&LINKS)
                    .any(|a| !normalized_text(a).is_empty())
            });
            if has_titled_link {
                rows.push(row);
                if rows.len() >= limit {
                    return rows;
                }
            }
        }
    }
    rows
}

/// (c) Any table row holding a long, non-numeric link.
fn generic_rows<'a>(doc: &'a Html, site: &SiteProfile, limit: usize) -> Vec<ElementRef<'a>> {
    let mut rows = Vec::new();
    for row in doc.select(&ALL_ROWS) {
        let row_text = normalized_text(row);
        if row_text.contains(site.report_name_header()) || row_text.contains(SERIAL_HEADER) {
            continue;
        }

        let row_cells = cells(row);
        let matched = if row_cells.len() >= 2 {
            row_cells[1].select(&LINKS).any(|a| is_title_text(&normalized_text(a)))
        } else {
            row.select(&LINKS).any(|a| {
                let text = normalized_text(a);
                let href = a.value().attr("href").unwrap_or_default();
                (href.contains("report") || href.contains("detail") || is_long_text(&text))
                    && !text.is_empty()
                    && !is_numeric(&text)
            })
        };

        if matched {
            rows.push(row);
            if rows.len() >= limit {
                break;
            }
        }
    }
    rows
}

/// Turns a report row into a record.
///
/// The title is the longest non-numeric link text in the row; rows without
/// any such link yield `None`.
pub(crate) fn record_from_row(
    row: ElementRef<'_>,
    site: &SiteProfile,
    category: Category,
) -> Option<ReportRecord> {
    let (title, href) = row
        .select(&LINKS)
        .filter_map(|a| {
            let text = normalized_text(a);
            let href = a.value().attr("href")?.trim().to_string();
            (!text.is_empty() && !is_numeric(&text)).then_some((text, href))
        })
        .max_by_key(|(text, _)| text.chars().count())?;

    let cell_texts: Vec<String> = cells(row).into_iter().map(normalized_text).collect();
    let published_date = date_from_cells(cell_texts.iter().map(String::as_str))
        .or_else(|| extract_date(&title))
        .unwrap_or_else(today);

    // Keep unresolvable hrefs so the orchestrator can account for them.
    let detail_reference = site.complete_url(&href).unwrap_or(href);

    Some(ReportRecord::new(
        title,
        published_date,
        detail_reference,
        category,
    ))
}

fn enclosing_row(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "tr")
}

fn cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

pub(crate) fn normalized_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_numeric(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

fn is_long_text(text: &str) -> bool {
    text.chars().count() >= MIN_TITLE_CHARS
}

fn is_title_text(text: &str) -> bool {
    is_long_text(text) && !is_numeric(text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Html {
        Html::parse_document(&format!("<html><body>{body}</body></html>"))
    }

    #[test]
    fn test_structural_rows_dedupes_and_limits() {
        let html = doc(r#"
            <table class="table-model"><tbody>
              <tr><td>1</td><td><a href="/a">First report title</a> <a href="/a2">x</a></td></tr>
              <tr><td>2</td><td><a href="/b">Second report title</a></td></tr>
              <tr><td>3</td><td><a href="/c">Third report title</a></td></tr>
            </tbody></table>"#);
        let rows = structural_rows(&html, &SiteProfile::default(), 2);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_header_column_requires_header_match() {
        let html = doc(r#"
            <table><thead><tr><th>日期</th><th>标题</th></tr></thead>
              <tbody><tr><td>2024-01-01</td><td><a href="/a">Some report title</a></td></tr></tbody>
            </table>"#);
        assert!(header_column_rows(&html, &SiteProfile::default(), 6).is_empty());
    }

    #[test]
    fn test_generic_rows_skip_header_rows() {
        let html = doc(r#"
            <table>
              <tr><td>序号</td><td><a href="/h">报告名称 header link</a></td></tr>
              <tr><td>1</td><td><a href="/r">A long enough title</a></td></tr>
              <tr><td>2</td><td><a href="/n">123456789</a></td></tr>
            </table>"#);
        let rows = generic_rows(&html, &SiteProfile::default(), 6);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_record_prefers_longest_non_numeric_link() {
        let html = doc(r#"
            <table><tr>
              <td><a href="/num">12345</a></td>
              <td><a href="/short">短标题</a></td>
              <td><a href="/report/info/AP1.html">这是一个更长的报告标题</a></td>
              <td>2024/1/9</td>
            </tr></table>"#);
        let site = SiteProfile::default();
        let row = html.select(&ALL_ROWS).next().unwrap();
        let record = record_from_row(row, &site, Category::Macro).unwrap();
        assert_eq!(record.title, "这是一个更长的报告标题");
        assert_eq!(
            record.detail_reference,
            "https://data.eastmoney.com/report/info/AP1.html"
        );
        assert_eq!(record.published_date, "2024-01-09");
        assert_eq!(record.category, Category::Macro);
    }

    #[test]
    fn test_record_date_falls_back_to_title_then_today() {
        let site = SiteProfile::default();
        let html = doc(r#"<table><tr><td><a href="/x">周报 2023-11-20 市场回顾</a></td></tr></table>"#);
        let row = html.select(&ALL_ROWS).next().unwrap();
        let record = record_from_row(row, &site, Category::Strategy).unwrap();
        assert_eq!(record.published_date, "2023-11-20");

        let html = doc(r#"<table><tr><td><a href="/y">没有日期的报告标题</a></td></tr></table>"#);
        let row = html.select(&ALL_ROWS).next().unwrap();
        let record = record_from_row(row, &site, Category::Strategy).unwrap();
        assert_eq!(record.published_date, today());
    }

    #[test]
    fn test_row_without_titled_link_yields_none() {
        let html = doc(r#"<table><tr><td><a href="/x">  </a></td><td>text</td></tr></table>"#);
        let row = html.select(&ALL_ROWS).next().unwrap();
        assert!(record_from_row(row, &SiteProfile::default(), Category::Stock).is_none());
    }
}
