//! Fetch strategies and the scrape session built on them.

pub mod block;
#[cfg(feature = "browser")]
pub mod browser;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod http_client;
pub mod orchestrator;
pub mod pagination;
pub mod rate_limiter;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[cfg(feature = "browser")]
pub use browser::{BrowserFetchConfig, BrowserFetcher, ReadinessProbe};
pub use block::{BlockDetector, BlockVerdict};
pub use error::{AbortReason, ConfigError, FetchError, PaginationCycle};
pub use extract::{FieldExtractor, FieldSpec, PageContext};
pub use fetch::{Identity, PageFetcher, PageHandle};
pub use http_client::HttpFetcher;
pub use orchestrator::{ScrapeRequest, ScrapeState, Scraper};
pub use pagination::{
    NavigationMode, NextPageAction, PageDecision, PaginationCursor, PaginationNavigator,
    PaginationStrategy,
};
pub use rate_limiter::{RateControlConfig, RateController, RotationOrder};

/// Page retrieval strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScraperType {
    /// Plain HTTP GET, no JavaScript.
    #[default]
    Static,
    /// Real browser, waits for the product selector to appear.
    Browser,
    /// Real browser, waits for the network to go idle.
    AsyncBrowser,
}

impl ScraperType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperType::Static => "static",
            ScraperType::Browser => "browser",
            ScraperType::AsyncBrowser => "async-browser",
        }
    }

    pub fn uses_browser(&self) -> bool {
        !matches!(self, ScraperType::Static)
    }
}

impl fmt::Display for ScraperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScraperType {
    type Err = ConfigError;

    /// Accepts the engine names older configs use (requests, selenium,
    /// playwright) as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" | "requests" | "http" => Ok(ScraperType::Static),
            "browser" | "selenium" | "sync-browser" => Ok(ScraperType::Browser),
            "async-browser" | "async_browser" | "playwright" => Ok(ScraperType::AsyncBrowser),
            other => Err(ConfigError::UnsupportedScraperType(other.to_string())),
        }
    }
}
