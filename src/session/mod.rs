//! Browser-backed session management.
//!
//! The browser driver is not safe to use from several tasks at once, so a
//! single actor task owns it. [`SessionBroker`] is a cheap, clonable handle
//! that sends commands to that task and awaits the replies. Download workers
//! receive a [`Session`] (a cookie snapshot) and never reach the browser.
//!
//! # Example
//!
//! ```no_run
//! use report_crawler::SiteProfile;
//! use report_crawler::session::{BrokerConfig, SessionBroker, UnavailableDriver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = SessionBroker::spawn(
//!     Box::new(UnavailableDriver::new("no browser")),
//!     BrokerConfig::for_site(&SiteProfile::default()),
//! );
//! let session = broker.establish(None).await?;
//! assert!(session.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod chromium;
mod cookies;
mod driver;
mod readiness;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

pub use chromium::{ChromiumDriver, LaunchProfile, find_chromium};
pub use cookies::{Session, SessionCookie};
pub use driver::{BrowserDriver, DriverError, ResponseMatcher, UnavailableDriver};
pub use readiness::{
    LoadOutcome, NavigationTimeouts, SettlePolicy, WaitTimeout, navigate_tolerant, poll_for,
    poll_until, settle,
};

use crate::site::SiteProfile;

/// Commands queued for the actor before callers block.
const COMMAND_BUFFER: usize = 32;

/// Accept header presented by browser tiers when fetching a binary.
const BINARY_ACCEPT: &str = "application/pdf,application/octet-stream,*/*";

/// Errors returned through a [`SessionBroker`] handle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The actor has shut down.
    #[error("session broker is closed")]
    Closed,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl SessionError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Driver(e) if e.is_timeout())
    }
}

/// Which settle policy applies after a page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    List,
    Detail,
}

/// Timing and bootstrap settings for the actor.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Generic page visited first to obtain baseline cookies.
    pub bootstrap_url: String,
    pub navigation: NavigationTimeouts,
    pub bootstrap_settle: SettlePolicy,
    pub list_settle: SettlePolicy,
    pub detail_settle: SettlePolicy,
    pub intercept_timeout: Duration,
    pub download_timeout: Duration,
}

impl BrokerConfig {
    #[must_use]
    pub fn for_site(site: &SiteProfile) -> Self {
        Self {
            bootstrap_url: site.report_index(),
            navigation: NavigationTimeouts::from_load(Duration::from_secs(30)),
            bootstrap_settle: SettlePolicy::delay(Duration::from_secs(2)),
            list_settle: SettlePolicy::delay(Duration::from_secs(3))
                .with_selector("table", Duration::from_secs(5)),
            detail_settle: SettlePolicy::delay(Duration::from_secs(2)),
            intercept_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_navigation_timeout(mut self, load: Duration) -> Self {
        self.navigation = NavigationTimeouts::from_load(load);
        self
    }

    /// Drops every fixed delay; selector and navigation waits still apply.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        for policy in [
            &mut self.bootstrap_settle,
            &mut self.list_settle,
            &mut self.detail_settle,
        ] {
            policy.delay = Duration::ZERO;
            policy.selector_timeout = Duration::ZERO;
        }
        self
    }
}

enum BrokerCommand {
    Establish {
        target: Option<String>,
        reply: oneshot::Sender<Session>,
    },
    FetchHtml {
        url: String,
        kind: PageKind,
        reply: oneshot::Sender<Result<String, DriverError>>,
    },
    CaptureResponse {
        url: String,
        referer: String,
        matcher: ResponseMatcher,
        reply: oneshot::Sender<Result<Vec<u8>, DriverError>>,
    },
    CaptureDownload {
        url: String,
        referer: String,
        dir: PathBuf,
        reply: oneshot::Sender<Result<PathBuf, DriverError>>,
    },
    Invalidate {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), DriverError>>,
    },
}

/// Handle to the task that owns the browser.
#[derive(Debug, Clone)]
pub struct SessionBroker {
    tx: mpsc::Sender<BrokerCommand>,
}

impl SessionBroker {
    /// Spawns the owning task. It stops after `shutdown` or once every
    /// handle has been dropped.
    #[must_use]
    pub fn spawn(driver: Box<dyn BrowserDriver>, config: BrokerConfig) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = BrokerActor {
            driver,
            config,
            session: None,
            visited: HashSet::new(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    /// Returns the warm session, navigating only when needed.
    ///
    /// The first call visits the bootstrap page. A `target` not visited yet
    /// is navigated too, widening the session; otherwise the cached session
    /// is returned as-is. Navigation or cookie failures produce an empty
    /// session rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown.
    pub async fn establish(&self, target: Option<&str>) -> Result<Session, SessionError> {
        let target = target.map(str::to_string);
        self.request(|reply| BrokerCommand::Establish { target, reply })
            .await
    }

    /// Loads `url` in the browser and returns the rendered HTML.
    ///
    /// # Errors
    ///
    /// Returns a driver error when navigation fails outright.
    pub async fn fetch_html(&self, url: &str, kind: PageKind) -> Result<String, SessionError> {
        let url = url.to_string();
        self.request(|reply| BrokerCommand::FetchHtml { url, kind, reply })
            .await?
            .map_err(SessionError::from)
    }

    /// Navigates to a binary URL and captures the matching response body.
    ///
    /// # Errors
    ///
    /// Returns a driver error, including a timeout, when nothing matched.
    pub async fn capture_response(
        &self,
        url: &str,
        referer: &str,
        matcher: ResponseMatcher,
    ) -> Result<Vec<u8>, SessionError> {
        let (url, referer) = (url.to_string(), referer.to_string());
        self.request(|reply| BrokerCommand::CaptureResponse {
            url,
            referer,
            matcher,
            reply,
        })
        .await?
        .map_err(SessionError::from)
    }

    /// Navigates to a binary URL expecting a download saved under `dir`.
    ///
    /// # Errors
    ///
    /// Returns a driver error, including a timeout, when no file appeared.
    pub async fn capture_download(
        &self,
        url: &str,
        referer: &str,
        dir: PathBuf,
    ) -> Result<PathBuf, SessionError> {
        let (url, referer) = (url.to_string(), referer.to_string());
        self.request(|reply| BrokerCommand::CaptureDownload {
            url,
            referer,
            dir,
            reply,
        })
        .await?
        .map_err(SessionError::from)
    }

    /// Forgets the cached session and visited pages.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown.
    pub async fn invalidate(&self) -> Result<(), SessionError> {
        self.request(|reply| BrokerCommand::Invalidate { reply })
            .await
    }

    /// Closes the browser and stops the actor.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if already stopped, or the driver's
    /// close error.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| BrokerCommand::Shutdown { reply })
            .await?
            .map_err(SessionError::from)
    }
}

struct BrokerActor {
    driver: Box<dyn BrowserDriver>,
    config: BrokerConfig,
    session: Option<Session>,
    visited: HashSet<String>,
}

impl BrokerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<BrokerCommand>) {
        debug!(driver = self.driver.name(), "session broker started");
        while let Some(command) = rx.recv().await {
            match command {
                BrokerCommand::Establish { target, reply } => {
                    let session = self.establish(target.as_deref()).await;
                    let _ = reply.send(session);
                }
                BrokerCommand::FetchHtml { url, kind, reply } => {
                    let _ = reply.send(self.fetch_html(&url, kind).await);
                }
                BrokerCommand::CaptureResponse {
                    url,
                    referer,
                    matcher,
                    reply,
                } => {
                    let result = self.capture_response(&url, &referer, &matcher).await;
                    let _ = reply.send(result);
                }
                BrokerCommand::CaptureDownload {
                    url,
                    referer,
                    dir,
                    reply,
                } => {
                    let result = self.capture_download(&url, &referer, &dir).await;
                    let _ = reply.send(result);
                }
                BrokerCommand::Invalidate { reply } => {
                    self.session = None;
                    self.visited.clear();
                    let _ = reply.send(());
                }
                BrokerCommand::Shutdown { reply } => {
                    let result = self.driver.close().await;
                    info!("session broker shut down");
                    let _ = reply.send(result);
                    return;
                }
            }
        }
        if let Err(error) = self.driver.close().await {
            warn!(error = %error, "browser close failed after last handle dropped");
        }
    }

    async fn visit(&mut self, url: &str, policy: &SettlePolicy) -> Result<(), DriverError> {
        let outcome = navigate_tolerant(self.driver.as_ref(), url, self.config.navigation).await?;
        debug!(url, ?outcome, "navigated");
        settle(self.driver.as_ref(), policy).await;
        self.visited.insert(url.to_string());
        Ok(())
    }

    #[instrument(skip(self), fields(warm = self.session.is_some()))]
    async fn establish(&mut self, target: Option<&str>) -> Session {
        let target = target.filter(|t| !t.trim().is_empty());
        if let Some(session) = &self.session
            && target.is_none_or(|t| self.visited.contains(t))
        {
            debug!("reusing established session");
            return session.clone();
        }

        if self.session.is_none() {
            let bootstrap = self.config.bootstrap_url.clone();
            let policy = self.config.bootstrap_settle.clone();
            if let Err(error) = self.visit(&bootstrap, &policy).await {
                warn!(url = %bootstrap, error = %error, "bootstrap navigation failed");
            }
        }
        if let Some(target) = target
            && !self.visited.contains(target)
        {
            let policy = self.config.detail_settle.clone();
            if let Err(error) = self.visit(target, &policy).await {
                warn!(url = %target, error = %error, "target navigation failed");
            }
        }

        let session = match self.driver.cookies().await {
            Ok(cookies) => Session::new(cookies),
            Err(error) => {
                warn!(error = %error, "could not read browser cookies; using empty session");
                Session::empty()
            }
        };
        info!(cookies = session.cookies().len(), "session established");
        self.session = Some(session.clone());
        session
    }

    #[instrument(skip(self))]
    async fn fetch_html(&mut self, url: &str, kind: PageKind) -> Result<String, DriverError> {
        let policy = match kind {
            PageKind::List => self.config.list_settle.clone(),
            PageKind::Detail => self.config.detail_settle.clone(),
        };
        self.visit(url, &policy).await?;
        self.driver.page_html().await
    }

    async fn prepare_binary_fetch(&mut self, referer: &str) -> Result<(), DriverError> {
        let widen = (referer != self.config.bootstrap_url).then_some(referer);
        self.establish(widen).await;
        self.driver
            .set_extra_headers(&[
                ("Referer".to_string(), referer.to_string()),
                ("Accept".to_string(), BINARY_ACCEPT.to_string()),
            ])
            .await
    }

    #[instrument(skip(self, matcher))]
    async fn capture_response(
        &mut self,
        url: &str,
        referer: &str,
        matcher: &ResponseMatcher,
    ) -> Result<Vec<u8>, DriverError> {
        self.prepare_binary_fetch(referer).await?;
        self.driver
            .capture_response(url, matcher, self.config.intercept_timeout)
            .await
    }

    #[instrument(skip(self))]
    async fn capture_download(
        &mut self,
        url: &str,
        referer: &str,
        dir: &std::path::Path,
    ) -> Result<PathBuf, DriverError> {
        self.prepare_binary_fetch(referer).await?;
        self.driver
            .capture_download(url, dir, self.config.download_timeout)
            .await
    }
}
