//! Common interface for the page retrieval strategies.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::Html;

use super::error::FetchError;
use super::ScraperType;

/// A fetched page: the fully loaded HTML plus response metadata.
///
/// The body is kept as text and parsed on demand so the handle can be
/// moved across await points.
#[derive(Debug, Clone)]
pub struct PageHandle {
    pub requested_url: String,
    /// Location after redirects or in-page navigation.
    pub final_url: String,
    pub status: u16,
    pub body: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
}

impl PageHandle {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            requested_url: url.clone(),
            final_url: url,
            status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Parse the body into a queryable document.
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Server-requested wait from the Retry-After header.
    ///
    /// Accepts delta-seconds or an HTTP date.
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.header("retry-after")?, Utc::now())
    }
}

pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (when - now).to_std().ok()
}

/// Request identity presented to the target site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub proxy: Option<String>,
}

/// A page retrieval strategy.
///
/// One fetcher serves one session; `close` must release every resource it
/// holds and is safe to call more than once.
#[async_trait]
pub trait PageFetcher: Send {
    /// Load `url` and return the page once it is ready for extraction.
    async fn fetch(&mut self, url: &str, identity: &Identity) -> Result<PageHandle, FetchError>;

    /// Activate the element at `selector` in the current page and return
    /// the resulting page.
    async fn click(
        &mut self,
        selector: &str,
        _identity: &Identity,
    ) -> Result<PageHandle, FetchError> {
        Err(FetchError::Unsupported(format!(
            "{} fetcher cannot click '{}'",
            self.kind(),
            selector
        )))
    }

    /// Whether `click` is available.
    fn supports_click(&self) -> bool {
        false
    }

    async fn close(&mut self) {}

    fn kind(&self) -> ScraperType;
}
