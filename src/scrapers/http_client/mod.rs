//! Static HTTP page fetcher.
//!
//! Plain GET requests with browser-like headers. Keeps a cookie session per
//! proxy so rotating identity does not leak cookies between exits.

pub mod user_agent;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use reqwest::{Client, Proxy};
use tracing::debug;

pub use user_agent::{DEFAULT_USER_AGENT, IMPERSONATE_USER_AGENTS};

use super::error::FetchError;
use super::fetch::{Identity, PageFetcher, PageHandle};
use super::ScraperType;
use crate::config::Settings;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Fetches raw HTML over HTTP without executing scripts.
pub struct HttpFetcher {
    timeout: Duration,
    /// One client per proxy (None = direct).
    clients: HashMap<Option<String>, Client>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.request_timeout())
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            "Upgrade-Insecure-Requests",
            HeaderValue::from_static("1"),
        );
        headers
    }

    fn client_for(&mut self, url: &str, proxy: Option<&str>) -> Result<Client, FetchError> {
        let key = proxy.map(|p| p.to_string());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .default_headers(Self::default_headers())
            .timeout(self.timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true);

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: format!("invalid proxy {}: {}", proxy, e),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| FetchError::Network {
            url: url.to_string(),
            message: format!("failed to create HTTP client: {}", e),
        })?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    fn map_error(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&mut self, url: &str, identity: &Identity) -> Result<PageHandle, FetchError> {
        let client = self.client_for(url, identity.proxy.as_deref())?;

        let mut request = client.get(url);
        if !identity.user_agent.is_empty() {
            request = request.header(USER_AGENT, &identity.user_agent);
        }

        debug!("GET {}", url);
        let response = request.send().await.map_err(|e| self.map_error(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        let body = response.text().await.map_err(|e| self.map_error(url, e))?;
        debug!("{} -> HTTP {} ({} bytes)", url, status, body.len());

        Ok(PageHandle {
            requested_url: url.to_string(),
            final_url,
            status,
            body,
            headers,
        })
    }

    async fn close(&mut self) {
        self.clients.clear();
    }

    fn kind(&self) -> ScraperType {
        ScraperType::Static
    }
}
