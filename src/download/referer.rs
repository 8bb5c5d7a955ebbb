//! Referer selection for binary fetches.

use crate::site::SiteProfile;

/// Picks the Referer to present when fetching `source_url`.
///
/// An explicit referer is used only when it is a real http(s) page distinct
/// from the binary itself; opaque source markers (`tushare://...`) and empty
/// values fall back to the site's report index.
#[must_use]
pub fn infer_referer(explicit: Option<&str>, source_url: &str, site: &SiteProfile) -> String {
    explicit
        .map(str::trim)
        .filter(|r| is_page_url(r) && *r != source_url.trim())
        .map_or_else(|| site.report_index(), str::to_string)
}

fn is_page_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}
