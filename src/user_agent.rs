//! User-Agent strings shared by the browser profile and the HTTP tier.
//!
//! Both must present the same desktop browser identity, otherwise cookies
//! issued to the browser can be rejected when replayed over plain HTTP.

/// Desktop Chrome on Windows.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// User-Agent for structured API calls, which do not need to look like a browser.
#[must_use]
pub(crate) fn api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("report-crawler/{version}")
}
