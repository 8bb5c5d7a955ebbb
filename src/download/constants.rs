//! Constants for the download module (timeouts, pacing, headers).

use std::time::Duration;

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default whole-request timeout for the HTTP tier.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Warning threshold for cumulative pacing delay per host.
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Largest Retry-After honoured.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Bytes buffered before the body prefix is checked for markup.
pub const BODY_PROBE_LEN: usize = 512;

pub const ACCEPT_DOCUMENT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8";

pub const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";
