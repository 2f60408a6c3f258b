//! Browser fetcher configuration.

use std::time::Duration;

use crate::config::Settings;
use crate::scrapers::ScraperType;

/// When a loaded page counts as ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// Poll until the selector matches (sync browser).
    ElementPresent(String),
    /// Wait until the network has been quiet for the window (async browser).
    NetworkIdle { quiet: Duration },
}

/// Browser launch and wait settings.
#[derive(Debug, Clone)]
pub struct BrowserFetchConfig {
    pub kind: ScraperType,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Bound on navigation and readiness waits.
    pub page_load_timeout: Duration,
    pub probe: ReadinessProbe,
    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,
    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    pub remote_url: Option<String>,
}

impl BrowserFetchConfig {
    /// Sync browser: waits for `ready_selector` to appear.
    pub fn sync(settings: &Settings, ready_selector: &str) -> Self {
        Self::build(
            settings,
            ScraperType::Browser,
            ReadinessProbe::ElementPresent(ready_selector.to_string()),
        )
    }

    /// Async browser: waits for network quiescence.
    pub fn network_idle(settings: &Settings) -> Self {
        Self::build(
            settings,
            ScraperType::AsyncBrowser,
            ReadinessProbe::NetworkIdle {
                quiet: settings.network_idle_window(),
            },
        )
    }

    fn build(settings: &Settings, kind: ScraperType, probe: ReadinessProbe) -> Self {
        Self {
            kind,
            headless: settings.headless,
            window_width: settings.window_width,
            window_height: settings.window_height,
            page_load_timeout: settings.page_load_timeout(),
            probe,
            chrome_args: settings.chrome_args.clone(),
            remote_url: settings.remote_browser_url.clone(),
        }
    }
}
