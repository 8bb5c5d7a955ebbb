//! Cookie snapshot handed from the browser to HTTP workers.
//!
//! A [`Session`] is a read-only copy of the browser context's cookies taken
//! after navigation. Workers never touch the browser; they load the session
//! into a `reqwest` cookie jar instead.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

/// One cookie read from the browser context.
///
/// The `Debug` impl redacts the value to prevent credential leakage in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .finish()
    }
}

impl SessionCookie {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
        secure: bool,
    ) -> Self {
        let path = path.into();
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: if path.is_empty() { "/".to_string() } else { path },
            secure,
        }
    }

    /// Returns the cookie value. Intentionally not shown in `Debug`.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn set_cookie_string(&self) -> String {
        let mut parts = vec![
            format!("{}={}", self.name, self.value),
            format!("Domain={}", self.domain),
            format!("Path={}", self.path),
        ];
        if self.secure {
            parts.push("Secure".to_string());
        }
        parts.join("; ")
    }

    /// `https://` for secure cookies, `http://` otherwise; leading dot stripped.
    fn origin_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let domain = self.domain.strip_prefix('.').unwrap_or(&self.domain);
        format!("{scheme}://{domain}{}", self.path)
    }
}

/// Cookies captured from the browser at a point in time.
#[derive(Clone)]
pub struct Session {
    cookies: Vec<SessionCookie>,
    established_at: DateTime<Utc>,
    jar: Arc<Jar>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.cookies)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::empty()
    }
}

impl Session {
    /// Builds a session and its cookie jar from captured cookies.
    #[must_use]
    #[instrument(level = "debug", skip(cookies), fields(count = cookies.len()))]
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        let jar = Arc::new(Jar::default());
        for cookie in &cookies {
            match cookie.origin_url().parse::<Url>() {
                Ok(url) => {
                    jar.add_cookie_str(&cookie.set_cookie_string(), &url);
                    debug!(domain = %cookie.domain, name = %cookie.name, "loaded cookie into jar");
                }
                Err(_) => {
                    warn!(domain = %cookie.domain, name = %cookie.name, "skipping cookie with unparseable domain");
                }
            }
        }
        Self {
            cookies,
            established_at: Utc::now(),
            jar,
        }
    }

    /// A session without cookies, used when no browser is available.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            cookies: Vec::new(),
            established_at: Utc::now(),
            jar: Arc::new(Jar::default()),
        }
    }

    #[must_use]
    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }

    #[must_use]
    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Shared jar suitable for `reqwest::ClientBuilder::cookie_provider`.
    #[must_use]
    pub fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    /// The `Cookie` header value the jar would send to `url`, if any.
    #[must_use]
    pub fn cookie_header_for(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        self.jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str, secure: bool) -> SessionCookie {
        SessionCookie::new(name, "secret-value", domain, "/", secure)
    }

    #[test]
    fn test_debug_redacts_value() {
        let rendered = format!("{:?}", cookie("qgqp_b_id", ".eastmoney.com", false));
        assert!(rendered.contains("qgqp_b_id"));
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_empty_path_defaults_to_root() {
        let c = SessionCookie::new("a", "b", "example.com", "", false);
        assert_eq!(c.path, "/");
    }

    #[test]
    fn test_jar_serves_matching_subdomain() {
        let session = Session::new(vec![cookie("st_si", ".dfcfw.com", false)]);
        let header = session
            .cookie_header_for("http://pdf.dfcfw.com/pdf/H3_1_1.pdf")
            .unwrap();
        assert!(header.contains("st_si=secret-value"));
    }

    #[test]
    fn test_jar_does_not_leak_cross_domain() {
        let session = Session::new(vec![cookie("st_si", ".eastmoney.com", false)]);
        assert!(session.cookie_header_for("http://other.test/").is_none());
    }

    #[test]
    fn test_secure_cookie_not_sent_over_http() {
        let session = Session::new(vec![cookie("sec", "secure.test", true)]);
        assert!(session.cookie_header_for("http://secure.test/").is_none());
        assert!(session.cookie_header_for("https://secure.test/").is_some());
    }

    #[test]
    fn test_empty_session() {
        let session = Session::empty();
        assert!(session.is_empty());
        assert!(session.cookie_header_for("https://data.eastmoney.com/").is_none());
    }
}
