//! Chromium driver built on `chromiumoxide`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams, Headers,
    SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::cookies::SessionCookie;
use super::driver::{BrowserDriver, DriverError, ResponseMatcher};
use super::readiness::poll_for;
use crate::user_agent::BROWSER_USER_AGENT;

/// Environment variable naming an explicit Chromium binary.
pub const CHROMIUM_ENV: &str = "REPORT_CRAWLER_CHROMIUM";

/// Hides the automation flag that interstitial scripts probe for.
const STEALTH_SCRIPT: &str = r"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['zh-CN', 'zh', 'en'] });
window.chrome = window.chrome || { runtime: {} };
";

/// Suffix Chromium uses for in-progress downloads.
const PARTIAL_DOWNLOAD_SUFFIX: &str = ".crdownload";

/// Finds a Chromium binary: explicit path, then [`CHROMIUM_ENV`], then `PATH`.
#[must_use]
pub fn find_chromium(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured.filter(|p| p.exists()) {
        return Some(path.to_path_buf());
    }
    if let Ok(value) = std::env::var(CHROMIUM_ENV) {
        let path = PathBuf::from(value);
        if path.exists() {
            return Some(path);
        }
    }
    ["google-chrome", "chromium", "chromium-browser"]
        .into_iter()
        .find_map(|name| which::which(name).ok())
}

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub executable: PathBuf,
    pub headless: bool,
    pub user_agent: String,
    pub window: (u32, u32),
}

impl LaunchProfile {
    #[must_use]
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            headless: true,
            user_agent: BROWSER_USER_AGENT.to_string(),
            window: (1920, 1080),
        }
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    fn browser_config(&self) -> Result<BrowserConfig, DriverError> {
        let (width, height) = self.window;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .window_size(width, height)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--lang=zh-CN")
            .arg(format!("--user-agent={}", self.user_agent));
        if !self.headless {
            builder = builder.with_head();
        }
        builder.build().map_err(DriverError::Launch)
    }
}

/// One Chromium process with a single page, owned by the session actor.
pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
}

impl std::fmt::Debug for ChromiumDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumDriver").finish_non_exhaustive()
    }
}

impl ChromiumDriver {
    /// Launches Chromium and prepares a page with network events enabled.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Launch`] when the process cannot be started and
    /// [`DriverError::Protocol`] when page setup fails.
    #[instrument(skip(profile), fields(executable = %profile.executable.display(), headless = profile.headless))]
    pub async fn launch(profile: &LaunchProfile) -> Result<Self, DriverError> {
        let config = profile.browser_config()?;
        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(error) = event {
                    debug!(error = %error, "browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(DriverError::protocol)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(DriverError::protocol)?;
        page.execute(EnableParams::default())
            .await
            .map_err(DriverError::protocol)?;

        info!("chromium launched");
        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler,
        })
    }

    async fn evaluate_string(&self, script: &str) -> Result<String, DriverError> {
        self.page
            .evaluate(script)
            .await
            .map_err(DriverError::protocol)?
            .into_value::<String>()
            .map_err(DriverError::protocol)
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    fn name(&self) -> &'static str {
        "chromium"
    }

    async fn start_navigation(&self, url: &str) -> Result<(), DriverError> {
        self.page
            .execute(NavigateParams::new(url))
            .await
            .map(|_| ())
            .map_err(|e| DriverError::navigation(url, e))
    }

    async fn wait_for_load(&self) -> Result<(), DriverError> {
        self.page
            .wait_for_navigation()
            .await
            .map(|_| ())
            .map_err(DriverError::protocol)
    }

    async fn ready_state(&self) -> Result<String, DriverError> {
        self.evaluate_string("document.readyState").await
    }

    async fn has_element(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn page_html(&self) -> Result<String, DriverError> {
        self.page.content().await.map_err(DriverError::protocol)
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, DriverError> {
        let cookies = self.page.get_cookies().await.map_err(DriverError::protocol)?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie::new(c.name, c.value, c.domain, c.path, c.secure))
            .collect())
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), DriverError> {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(map),
            )))
            .await
            .map(|_| ())
            .map_err(DriverError::protocol)
    }

    #[instrument(skip(self, matcher), fields(url))]
    async fn capture_response(
        &self,
        url: &str,
        matcher: &ResponseMatcher,
        timeout: Duration,
    ) -> Result<Vec<u8>, DriverError> {
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(DriverError::protocol)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(DriverError::protocol)?;

        // Script navigation keeps the current page as the initiator.
        let target = serde_json::to_string(url).map_err(DriverError::protocol)?;
        if let Err(error) = self
            .page
            .evaluate(format!("window.location.href = {target}"))
            .await
        {
            debug!(error = %error, "navigation script returned an error");
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut matched = None;
        let request_id = loop {
            tokio::select! {
                Some(event) = responses.next() => {
                    if matched.is_none() && matcher.matches(&event.response.url) {
                        debug!(
                            response_url = %event.response.url,
                            status = event.response.status,
                            mime = %event.response.mime_type,
                            "matched binary response"
                        );
                        matched = Some(event.request_id.clone());
                    }
                }
                Some(event) = finished.next() => {
                    if matched.as_ref() == Some(&event.request_id) {
                        break event.request_id.clone();
                    }
                }
                () = &mut deadline => {
                    return Err(DriverError::timeout("response capture", timeout));
                }
            }
        };

        let body = self
            .page
            .execute(GetResponseBodyParams::new(request_id))
            .await
            .map_err(DriverError::protocol)?;
        let body = &body.result;
        if body.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(&body.body)
                .map_err(DriverError::protocol)
        } else {
            Ok(body.body.clone().into_bytes())
        }
    }

    #[instrument(skip(self), fields(url, dir = %dir.display()))]
    async fn capture_download(
        &self,
        url: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, DriverError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DriverError::io(dir, e))?;
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().into_owned())
            .build()
            .map_err(DriverError::Protocol)?;
        self.page
            .execute(behavior)
            .await
            .map_err(DriverError::protocol)?;

        let before = list_files(dir).await?;
        // Navigations that turn into downloads report as aborted.
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => debug!(error = %error, "download navigation ended with error"),
            Err(_) => warn!("download navigation did not settle in time"),
        }

        poll_for(
            || {
                let before = &before;
                async move { new_completed_file(dir, before).await }
            },
            timeout,
            Duration::from_millis(250),
        )
        .await
        .map_err(|_| DriverError::timeout("download capture", timeout))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut browser = self.browser.lock().await;
        let result = browser.close().await.map(|_| ()).map_err(DriverError::protocol);
        self.handler.abort();
        result
    }
}

async fn list_files(dir: &Path) -> Result<HashSet<PathBuf>, DriverError> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| DriverError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DriverError::io(dir, e))?
    {
        names.insert(entry.path());
    }
    Ok(names)
}

async fn new_completed_file(dir: &Path, before: &HashSet<PathBuf>) -> Option<PathBuf> {
    let current = list_files(dir).await.ok()?;
    for path in current {
        if before.contains(&path)
            || path
                .to_string_lossy()
                .ends_with(PARTIAL_DOWNLOAD_SUFFIX)
        {
            continue;
        }
        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size > 0 {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_wins_when_present() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = dir.path().join("chrome");
        std::fs::write(&binary, b"").unwrap();
        assert_eq!(find_chromium(Some(&binary)), Some(binary));
    }

    #[test]
    fn test_launch_profile_defaults() {
        let profile = LaunchProfile::new(PathBuf::from("/usr/bin/chromium"));
        assert!(profile.headless);
        assert_eq!(profile.window, (1920, 1080));
        assert!(profile.user_agent.contains("Chrome/"));
        assert!(!profile.headless(false).headless);
    }

    #[tokio::test]
    async fn test_new_completed_file_skips_partial_and_known() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.pdf"), b"old").unwrap();
        let before = list_files(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("report.pdf.crdownload"), b"partial").unwrap();
        assert!(new_completed_file(dir.path(), &before).await.is_none());
        std::fs::write(dir.path().join("report.pdf"), b"done").unwrap();
        assert_eq!(
            new_completed_file(dir.path(), &before).await,
            Some(dir.path().join("report.pdf"))
        );
    }

    #[tokio::test]
    #[ignore = "requires a local Chromium install"]
    async fn test_launch_and_read_page() {
        let Some(executable) = find_chromium(None) else {
            return;
        };
        let driver = ChromiumDriver::launch(&LaunchProfile::new(executable))
            .await
            .unwrap();
        driver
            .start_navigation("data:text/html,<table><tr><td>x</td></tr></table>")
            .await
            .unwrap();
        driver.wait_for_load().await.unwrap();
        assert!(driver.page_html().await.unwrap().contains("<table>"));
        driver.close().await.unwrap();
    }
}
