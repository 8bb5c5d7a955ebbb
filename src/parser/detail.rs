//! Binary-link extraction from detail pages.

use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::list::normalized_text;
use crate::site::SiteProfile;

/// Finds a candidate binary href in a detail document.
pub type LinkFinder = fn(&Html, &SiteProfile) -> Option<String>;

/// A named link-finding strategy.
#[derive(Clone, Copy)]
pub struct DetailHeuristic {
    pub name: &'static str,
    pub find: LinkFinder,
}

impl std::fmt::Debug for DetailHeuristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetailHeuristic").field("name", &self.name).finish()
    }
}

/// Link finders in the order they are attempted.
pub const DETAIL_HEURISTICS: [DetailHeuristic; 4] = [
    DetailHeuristic {
        name: "pdf_link_marker",
        find: marked_link,
    },
    DetailHeuristic {
        name: "pdf_on_binary_host",
        find: pdf_on_binary_host,
    },
    DetailHeuristic {
        name: "view_text",
        find: view_text_link,
    },
    DetailHeuristic {
        name: "binary_host",
        find: any_binary_host_link,
    },
];

#[allow(clippy::expect_used)]
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector is valid"));

/// Visible text that suggests a "view" or "PDF" button.
const VIEW_MARKERS: &[&str] = &["pdf", "查看"];

/// (a) Anchor carrying the pdf-link class.
fn marked_link(doc: &Html, site: &SiteProfile) -> Option<String> {
    let selector = Selector::parse(&format!("a.{}[href]", site.pdf_link_class())).ok()?;
    doc.select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

/// (b) Href or text mentions "pdf" and the href is on the binary host.
fn pdf_on_binary_host(doc: &Html, site: &SiteProfile) -> Option<String> {
    anchors(doc).find_map(|(href, text)| {
        let href_lower = href.to_lowercase();
        ((href_lower.contains("pdf") || text.contains("pdf"))
            && href_lower.contains(site.binary_host()))
        .then_some(href)
    })
}

/// (c) Text reads like a view/PDF button and the href carries either marker.
fn view_text_link(doc: &Html, site: &SiteProfile) -> Option<String> {
    let domain = registrable_domain(site.binary_host());
    anchors(doc).find_map(|(href, text)| {
        let href_lower = href.to_lowercase();
        (VIEW_MARKERS.iter().any(|m| text.contains(m))
            && (href_lower.contains("pdf") || href_lower.contains(domain)))
        .then_some(href)
    })
}

/// (d) Anything on the binary host.
fn any_binary_host_link(doc: &Html, site: &SiteProfile) -> Option<String> {
    anchors(doc).find_map(|(href, _)| {
        href.to_lowercase()
            .contains(site.binary_host())
            .then_some(href)
    })
}

/// `(href, lowercased text)` for every anchor with a non-empty href.
fn anchors(doc: &Html) -> impl Iterator<Item = (String, String)> + '_ {
    doc.select(&LINKS).filter_map(|a| {
        let href = a.value().attr("href")?.trim();
        (!href.is_empty()).then(|| (href.to_string(), normalized_text(a).to_lowercase()))
    })
}

/// Last two labels of a host, e.g. `pdf.dfcfw.com` -> `dfcfw.com`.
fn registrable_domain(host: &str) -> &str {
    let mut dots = host.rmatch_indices('.');
    dots.next();
    match dots.next() {
        Some((index, _)) => &host[index + 1..],
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Html {
        Html::parse_document(&format!("<html><body>{body}</body></html>"))
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("pdf.dfcfw.com"), "dfcfw.com");
        assert_eq!(registrable_domain("dfcfw.com"), "dfcfw.com");
        assert_eq!(registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn test_marked_link() {
        let html = doc(r#"<a class="btn pdf-link" href=" https://x.test/a.pdf ">下载</a>"#);
        assert_eq!(
            marked_link(&html, &SiteProfile::default()).as_deref(),
            Some("https://x.test/a.pdf")
        );
    }

    #[test]
    fn test_pdf_on_binary_host_requires_host() {
        let site = SiteProfile::default();
        let html = doc(r#"<a href="https://other.test/a.pdf">PDF</a>"#);
        assert!(pdf_on_binary_host(&html, &site).is_none());
        let html = doc(r#"<a href="https://pdf.dfcfw.com/pdf/H3_1_1.pdf">download</a>"#);
        assert!(pdf_on_binary_host(&html, &site).is_some());
    }

    #[test]
    fn test_view_text_link_accepts_domain_marker() {
        let site = SiteProfile::default();
        let html = doc(r#"<a href="https://static.dfcfw.com/view?id=1">查看原文</a>"#);
        assert_eq!(
            view_text_link(&html, &site).as_deref(),
            Some("https://static.dfcfw.com/view?id=1")
        );
    }

    #[test]
    fn test_binary_host_link_is_unconditional() {
        let site = SiteProfile::default();
        let html = doc(r#"<a href="https://pdf.dfcfw.com/file?id=9">原文</a>"#);
        assert!(any_binary_host_link(&html, &site).is_some());
    }
}
