//! Per-host request pacing.
//!
//! Structured data sources enforce per-minute quotas; [`RateLimiter`] keeps
//! a minimum interval between calls to the same host and absorbs
//! server-mandated delays from `Retry-After`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use report_crawler::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(500));
//! limiter.acquire("https://api.tushare.pro").await; // immediate
//! limiter.acquire("https://api.tushare.pro").await; // waits ~500ms
//! limiter.acquire("https://reportapi.eastmoney.com/report/list").await; // other host, immediate
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug)]
struct HostState {
    /// Earliest instant the next request may start; `None` before the first.
    next_allowed: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            next_allowed: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_delay(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        Duration::from_millis(self.cumulative_delay_ms.fetch_add(ms, Ordering::SeqCst) + ms)
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            hosts: DashMap::new(),
        }
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn state(&self, host: &str) -> Arc<HostState> {
        // Clone the Arc so the shard lock is released before awaiting.
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone()
    }

    /// Waits until a request to `url`'s host is allowed, then reserves the slot.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        let host = extract_domain(url);
        tracing::Span::current().record("host", host.as_str());
        let state = self.state(&host);

        let mut next_allowed = state.next_allowed.lock().await;
        if let Some(at) = *next_allowed {
            let now = Instant::now();
            if at > now {
                let delay = at - now;
                let cumulative = state.add_delay(delay);
                debug!(delay_ms = delay.as_millis(), "pacing request");
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "heavy pacing for host"
                    );
                }
                tokio::time::sleep(delay).await;
            }
        }
        *next_allowed = Some(Instant::now() + self.interval);
    }

    /// Pushes the host's next slot out by a server-mandated delay.
    #[instrument(skip(self), fields(host))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_domain(url);
        tracing::Span::current().record("host", host.as_str());
        let state = self.state(&host);
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        let mut next_allowed = state.next_allowed.lock().await;
        if next_allowed.is_none_or(|at| at < until) {
            *next_allowed = Some(until);
        }
        debug!(delay_ms = delay.as_millis(), "recorded server rate limit");
    }
}

/// Lowercased host of `url`, or `"unknown"` when it has none.
///
/// ```
/// use report_crawler::download::extract_domain;
///
/// assert_eq!(extract_domain("https://PDF.dfcfw.com/pdf/a.pdf"), "pdf.dfcfw.com");
/// assert_eq!(extract_domain("tushare://strategy"), "strategy");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses `Retry-After` as seconds or an HTTP-date, capped at one hour.
///
/// ```
/// use std::time::Duration;
/// use report_crawler::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
/// assert_eq!(parse_retry_after("-1"), None);
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    let delay = at
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Some(delay.min(MAX_RETRY_AFTER))
}
