//! Retry classification and exponential backoff.
//!
//! Errors are classified into a [`FailureType`]; [`RetryPolicy`] turns the
//! type and attempt count into a [`RetryDecision`].
//!
//! # Example
//!
//! ```
//! use report_crawler::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://pdf.dfcfw.com/pdf/a.pdf", 503);
//! assert!(matches!(
//!     policy.should_retry(classify_error(&error), 1),
//!     RetryDecision::Retry { attempt: 2, .. }
//! ));
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const MAX_JITTER: Duration = Duration::from_millis(500);

/// How a failure should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeouts, resets, 5xx. May succeed later.
    Transient,
    /// Will not succeed on retry.
    Permanent,
    /// Rejected for missing credentials or cookies.
    NeedsAuth,
    /// Server or data source quota exceeded.
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// 1-indexed number of the upcoming attempt.
        attempt: u32,
    },
    DoNotRetry {
        reason: String,
    },
}

/// Exponential backoff: `min(base * multiplier^(attempt-1), max) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Retries immediately, without backoff or jitter.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt number `attempt` (1-indexed) should be followed
    /// by another.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "request rejected; session cookies not accepted".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "will retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let scaled = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64) + self.jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        if !self.jitter {
            return Duration::ZERO;
        }
        let max = MAX_JITTER.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Classifies a download error for the retry loop.
///
/// | Error | Type |
/// |-------|------|
/// | 401, 403, 407 | `NeedsAuth` |
/// | 408, 5xx, timeout, most network errors | `Transient` |
/// | 429 | `RateLimited` |
/// | other 4xx, TLS errors, IO, invalid URL | `Permanent` |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } if is_tls_error(source) => FailureType::Permanent,
        DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::Io { .. } | DownloadError::InvalidUrl { .. } | DownloadError::Client(_) => {
            FailureType::Permanent
        }
    }
}

pub(crate) fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 | 407 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let text = error.to_string().to_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|marker| text.contains(marker))
}
