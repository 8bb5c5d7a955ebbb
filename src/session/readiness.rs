//! Poll-until-condition waits used instead of fixed sleeps.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::driver::{BrowserDriver, DriverError};

/// A bounded wait expired before its condition held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("condition not met within {waited:?}")]
pub struct WaitTimeout {
    pub waited: Duration,
}

/// Polls `probe` until it yields a value or `timeout` elapses.
///
/// The probe runs at least once, even with a zero timeout.
pub async fn poll_for<T, F, Fut>(
    mut probe: F,
    timeout: Duration,
    interval: Duration,
) -> Result<T, WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = probe().await {
            return Ok(value);
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(WaitTimeout { waited: elapsed });
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Polls a boolean condition until it holds or `timeout` elapses.
pub async fn poll_until<F, Fut>(
    mut probe: F,
    timeout: Duration,
    interval: Duration,
) -> Result<(), WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_for(
        || {
            let check = probe();
            async move { check.await.then_some(()) }
        },
        timeout,
        interval,
    )
    .await
}

/// How a tolerant navigation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The full load event fired.
    Loaded,
    /// The DOM became interactive before the full load finished.
    DomReady,
    /// Neither wait finished in time; the page is used as-is.
    Partial,
}

/// Bounds for one tolerant navigation.
#[derive(Debug, Clone, Copy)]
pub struct NavigationTimeouts {
    pub load: Duration,
    pub dom_ready: Duration,
    pub poll_interval: Duration,
}

impl NavigationTimeouts {
    /// DOM-ready wait is a third of the full-load wait.
    #[must_use]
    pub fn from_load(load: Duration) -> Self {
        Self {
            load,
            dom_ready: load / 3,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// What to wait for after a page has loaded.
#[derive(Debug, Clone, Default)]
pub struct SettlePolicy {
    /// Element that signals the interesting content has rendered.
    pub ready_selector: Option<String>,
    pub selector_timeout: Duration,
    /// Fixed delay for trailing asynchronous scripts.
    pub delay: Duration,
}

impl SettlePolicy {
    #[must_use]
    pub fn delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>, timeout: Duration) -> Self {
        self.ready_selector = Some(selector.into());
        self.selector_timeout = timeout;
        self
    }
}

/// Navigates and races the full load against a shorter DOM-ready poll.
///
/// Whichever finishes first is accepted. When both run out the partially
/// loaded page is still accepted; only an outright navigation failure is an
/// error.
pub async fn navigate_tolerant(
    driver: &dyn BrowserDriver,
    url: &str,
    timeouts: NavigationTimeouts,
) -> Result<LoadOutcome, DriverError> {
    driver.start_navigation(url).await?;

    let load = tokio::time::timeout(timeouts.load, driver.wait_for_load());
    let dom_ready = poll_until(
        || async move {
            matches!(
                driver.ready_state().await.as_deref(),
                Ok("interactive" | "complete")
            )
        },
        timeouts.dom_ready,
        timeouts.poll_interval,
    );
    tokio::pin!(load, dom_ready);

    let mut dom_wait_expired = false;
    loop {
        tokio::select! {
            result = &mut load => {
                return match result {
                    Ok(Ok(())) => Ok(LoadOutcome::Loaded),
                    Ok(Err(error)) => Err(error),
                    Err(_) => {
                        warn!(url, "page did not finish loading; continuing with partial load");
                        Ok(LoadOutcome::Partial)
                    }
                };
            }
            result = &mut dom_ready, if !dom_wait_expired => {
                match result {
                    Ok(()) => {
                        debug!(url, "DOM ready before full load");
                        return Ok(LoadOutcome::DomReady);
                    }
                    Err(_) => dom_wait_expired = true,
                }
            }
        }
    }
}

/// Waits for the ready selector (tolerating a miss), then the fixed delay.
pub async fn settle(driver: &dyn BrowserDriver, policy: &SettlePolicy) {
    if let Some(selector) = policy.ready_selector.as_deref() {
        let found = poll_until(
            || async move { driver.has_element(selector).await.unwrap_or(false) },
            policy.selector_timeout,
            Duration::from_millis(200),
        )
        .await;
        if found.is_err() {
            debug!(selector, "ready selector not found; continuing");
        }
    }
    if !policy.delay.is_zero() {
        tokio::time::sleep(policy.delay).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_poll_until_succeeds_after_some_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = poll_until(
            move || {
                let counter = Arc::clone(&counter);
                async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(2),
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let result = poll_until(
            || async { false },
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
        .await;
        let err = result.unwrap_err();
        assert!(err.waited >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_poll_runs_once_with_zero_timeout() {
        let value = poll_for(|| async { Some(7) }, Duration::ZERO, Duration::ZERO).await;
        assert_eq!(value, Ok(7));
    }

    #[test]
    fn test_navigation_timeouts_from_load() {
        let t = NavigationTimeouts::from_load(Duration::from_secs(30));
        assert_eq!(t.dom_ready, Duration::from_secs(10));
    }
}
