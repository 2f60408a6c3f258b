//! Browser-driven page fetcher.
//!
//! Drives Chromium over CDP (chromiumoxide). The sync variant waits for a
//! selector to appear; the async variant waits for the network to go quiet.
//! One browser and one tab serve the whole session so in-page clicks keep
//! their state.

mod config;
mod stealth;

pub use config::{BrowserFetchConfig, ReadinessProbe};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use stealth::{NAVIGATION_STATUS_SCRIPT, STEALTH_ARGS, STEALTH_SCRIPTS};

use super::error::FetchError;
use super::fetch::{Identity, PageFetcher, PageHandle};
use super::ScraperType;

/// Poll interval while waiting for a selector.
const SELECTOR_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
enum NetworkEvent {
    Started,
    Settled,
}

/// Browser-based fetcher with stealth launch flags.
pub struct BrowserFetcher {
    config: BrowserFetchConfig,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    /// Proxy the running browser was launched with.
    launched_proxy: Option<String>,
    /// User agent currently applied to the tab.
    user_agent: Option<String>,
}

impl BrowserFetcher {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        // Common install locations
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(config: BrowserFetchConfig) -> Self {
        Self {
            config,
            browser: None,
            handler: None,
            page: None,
            launched_proxy: None,
            user_agent: None,
        }
    }

    fn find_chrome() -> Result<PathBuf, FetchError> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(FetchError::Unsupported(
            "Chrome/Chromium not found. Please install it:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Or download from: https://www.google.com/chrome/"
                .to_string(),
        ))
    }

    fn browser_error(url: &str, err: impl std::fmt::Display) -> FetchError {
        FetchError::Browser {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Launch or connect a browser for `identity`, restarting it when the
    /// proxy changed.
    async fn ensure_browser(&mut self, url: &str, identity: &Identity) -> Result<(), FetchError> {
        let proxy_changed = self.config.remote_url.is_none() && self.launched_proxy != identity.proxy;
        if self.browser.is_some() && !proxy_changed {
            return Ok(());
        }
        if self.browser.is_some() {
            info!("Proxy changed, relaunching browser");
            self.shutdown().await;
        }

        if let Some(remote_url) = self.config.remote_url.clone() {
            return self.connect_remote(url, &remote_url).await;
        }

        info!("Launching browser (headless={})", self.config.headless);
        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(self.config.window_width, self.config.window_height)
            .request_timeout(self.config.page_load_timeout);

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = identity.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder.arg(format!(
            "--window-size={},{}",
            self.config.window_width, self.config.window_height
        ));
        for arg in STEALTH_ARGS {
            builder = builder.arg(*arg);
        }
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| Self::browser_error(url, format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Self::browser_error(url, format!("Failed to launch browser: {}", e)))?;

        self.handler = Some(tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        }));
        self.browser = Some(browser);
        self.launched_proxy = identity.proxy.clone();
        Ok(())
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(&mut self, url: &str, remote_url: &str) -> Result<(), FetchError> {
        info!("Connecting to remote browser at {}", remote_url);

        // Get WebSocket URL from the /json/version endpoint
        let http_url = remote_url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(self.config.page_load_timeout)
            .send()
            .await
            .map_err(|e| Self::browser_error(url, format!("Failed to connect to remote browser: {}", e)))?
            .json()
            .await
            .map_err(|e| Self::browser_error(url, format!("Failed to parse browser version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Self::browser_error(url, "No webSocketDebuggerUrl in response"))?;

        info!("Connecting to WebSocket: {}", ws_url);
        let handler_config = HandlerConfig {
            request_timeout: self.config.page_load_timeout,
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| Self::browser_error(url, format!("Failed to connect to remote browser: {}", e)))?;

        self.handler = Some(tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        }));
        self.browser = Some(browser);
        Ok(())
    }

    /// The session tab, created with stealth patches on first use.
    async fn ensure_page(&mut self, url: &str) -> Result<Page, FetchError> {
        if let Some(page) = &self.page {
            return Ok(page.clone());
        }
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| Self::browser_error(url, "browser not initialized"))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| Self::browser_error(url, e))?;

        debug!("Installing stealth scripts");
        for script in STEALTH_SCRIPTS {
            if let Err(e) = page
                .execute(AddScriptToEvaluateOnNewDocumentParams::new(script.to_string()))
                .await
            {
                debug!("Stealth script injection skipped: {}", e);
            }
        }

        self.user_agent = None;
        self.page = Some(page.clone());
        Ok(page)
    }

    async fn apply_user_agent(&mut self, page: &Page, url: &str, identity: &Identity) -> Result<(), FetchError> {
        if identity.user_agent.is_empty() || self.user_agent.as_deref() == Some(identity.user_agent.as_str()) {
            return Ok(());
        }
        page.execute(SetUserAgentOverrideParams::new(identity.user_agent.clone()))
            .await
            .map_err(|e| Self::browser_error(url, e))?;
        self.user_agent = Some(identity.user_agent.clone());
        Ok(())
    }

    async fn network_events(page: &Page, url: &str) -> Result<BoxStream<'static, NetworkEvent>, FetchError> {
        let started = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| Self::browser_error(url, e))?;
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|e| Self::browser_error(url, e))?;
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|e| Self::browser_error(url, e))?;

        Ok(stream::select_all(vec![
            started.map(|_| NetworkEvent::Started).boxed(),
            finished.map(|_| NetworkEvent::Settled).boxed(),
            failed.map(|_| NetworkEvent::Settled).boxed(),
        ])
        .boxed())
    }

    /// Wait until no request has been in flight for `quiet`.
    ///
    /// Gives up at the page-load deadline and returns the page as it is.
    async fn wait_for_network_idle(&self, events: &mut BoxStream<'static, NetworkEvent>, quiet: Duration) {
        let deadline = Instant::now() + self.config.page_load_timeout;
        let mut in_flight: i64 = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!("Timeout waiting for network idle ({} requests in flight)", in_flight);
                return;
            }
            let window = quiet.min(deadline - now);
            match tokio::time::timeout(window, events.next()).await {
                Ok(Some(NetworkEvent::Started)) => in_flight += 1,
                Ok(Some(NetworkEvent::Settled)) => in_flight = (in_flight - 1).max(0),
                Ok(None) => return,
                Err(_) if in_flight == 0 && window == quiet => {
                    debug!("Network idle for {:?}", quiet);
                    return;
                }
                Err(_) => {}
            }
        }
    }

    /// Poll for `selector` until it matches or the page-load timeout passes.
    async fn wait_for_selector(&self, page: &Page, selector: &str) {
        debug!("Waiting for selector: {}", selector);
        let poll = async {
            loop {
                if page.find_element(selector).await.is_ok() {
                    return;
                }
                tokio::time::sleep(SELECTOR_POLL).await;
            }
        };
        match tokio::time::timeout(self.config.page_load_timeout, poll).await {
            Ok(()) => debug!("Selector found"),
            Err(_) => warn!("Timeout waiting for selector {}", selector),
        }
    }

    async fn wait_until_ready(&self, page: &Page, events: &mut BoxStream<'static, NetworkEvent>) {
        match &self.config.probe {
            ReadinessProbe::ElementPresent(selector) => self.wait_for_selector(page, selector).await,
            ReadinessProbe::NetworkIdle { quiet } => self.wait_for_network_idle(events, *quiet).await,
        }
    }

    async fn snapshot(&self, page: &Page, requested_url: &str) -> Result<PageHandle, FetchError> {
        let final_url = page
            .url()
            .await
            .map_err(|e| Self::browser_error(requested_url, e))?
            .map(|u| u.to_string())
            .unwrap_or_else(|| requested_url.to_string());
        let body = page
            .content()
            .await
            .map_err(|e| Self::browser_error(requested_url, e))?;

        let status = match page.evaluate(NAVIGATION_STATUS_SCRIPT.to_string()).await {
            Ok(result) => result
                .value()
                .and_then(|v| v.as_u64())
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(200),
            Err(e) => {
                debug!("Could not read navigation status: {}", e);
                200
            }
        };

        Ok(PageHandle {
            requested_url: requested_url.to_string(),
            final_url,
            status,
            body,
            headers: Default::default(),
        })
    }

    async fn shutdown(&mut self) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            if self.config.remote_url.is_none() {
                if let Err(e) = browser.close().await {
                    debug!("Browser close failed: {}", e);
                }
                let _ = browser.wait().await;
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        self.launched_proxy = None;
        self.user_agent = None;
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&mut self, url: &str, identity: &Identity) -> Result<PageHandle, FetchError> {
        self.ensure_browser(url, identity).await?;
        let page = self.ensure_page(url).await?;
        self.apply_user_agent(&page, url, identity).await?;

        let mut events = Self::network_events(&page, url).await?;

        info!("Navigating to {}", url);
        let timeout = self.config.page_load_timeout;
        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                timeout,
            })?
            .map_err(|e| Self::browser_error(url, format!("Navigation failed: {}", e)))?;

        self.wait_until_ready(&page, &mut events).await;
        self.snapshot(&page, url).await
    }

    async fn click(&mut self, selector: &str, identity: &Identity) -> Result<PageHandle, FetchError> {
        let page = self
            .page
            .clone()
            .ok_or_else(|| FetchError::Unsupported("no page loaded to click in".to_string()))?;
        let current = page
            .url()
            .await
            .ok()
            .flatten()
            .map(|u| u.to_string())
            .unwrap_or_default();
        self.apply_user_agent(&page, &current, identity).await?;

        let mut events = Self::network_events(&page, &current).await?;

        debug!("Clicking {}", selector);
        let timeout = self.config.page_load_timeout;
        let click = async {
            let element = page.find_element(selector).await?;
            element.scroll_into_view().await?;
            element.click().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        tokio::time::timeout(timeout, click)
            .await
            .map_err(|_| FetchError::Timeout {
                url: current.clone(),
                timeout,
            })?
            .map_err(|e| Self::browser_error(&current, format!("Click on {} failed: {}", selector, e)))?;

        // Let the click's requests finish before probing.
        let quiet = match self.config.probe {
            ReadinessProbe::NetworkIdle { quiet } => quiet,
            ReadinessProbe::ElementPresent(_) => Duration::from_millis(500),
        };
        self.wait_for_network_idle(&mut events, quiet).await;
        if let ReadinessProbe::ElementPresent(ref ready) = self.config.probe {
            self.wait_for_selector(&page, ready).await;
        }

        self.snapshot(&page, &current).await
    }

    fn supports_click(&self) -> bool {
        true
    }

    async fn close(&mut self) {
        if self.browser.is_some() {
            info!("Closing browser");
        }
        self.shutdown().await;
    }

    fn kind(&self) -> ScraperType {
        self.config.kind
    }
}
