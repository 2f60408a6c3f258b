//! Scraper error types.

use std::time::Duration;

use thiserror::Error;

use super::block::BlockVerdict;

/// Failure while retrieving a page.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("Timed out after {timeout:?} loading {url}")]
    Timeout { url: String, timeout: Duration },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Browser error on {url}: {message}")]
    Browser { url: String, message: String },
    #[error("{0}")]
    Unsupported(String),
}

impl FetchError {
    /// Client errors other than request-timeout/too-early never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                !(400..500).contains(status) || matches!(status, 408 | 425)
            }
            FetchError::Unsupported(_) => false,
            _ => true,
        }
    }
}

/// Invalid scraper configuration, detected at construction time.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Field '{0}' has an empty selector list")]
    EmptySelectorList(String),
    #[error("Invalid CSS selector '{selector}' for {context}")]
    InvalidSelector { context: String, selector: String },
    #[error("Duplicate field name '{0}'")]
    DuplicateField(String),
    #[error("Field name '{0}' collides with a record metadata column")]
    ReservedFieldName(String),
    #[error("Unsupported scraper type '{0}' (expected static, browser or async-browser)")]
    UnsupportedScraperType(String),
    #[error("Invalid target URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    BrowserUnavailable,
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Failed to load settings from {path}: {message}")]
    Load { path: String, message: String },
}

/// Raised when the next page resolves to an already-visited location.
#[derive(Debug, Clone, Error)]
#[error("Pagination cycle: {target} was already visited")]
pub struct PaginationCycle {
    pub target: String,
}

/// Why a session ended in the aborted state.
#[derive(Debug, Clone, Error)]
pub enum AbortReason {
    #[error("Page {page_number} failed after {attempts} attempt(s): {error}")]
    Fetch {
        page_number: u32,
        attempts: u32,
        error: FetchError,
    },
    #[error("Blocked on {url} ({verdict}) after {attempts} attempt(s)")]
    Blocked {
        url: String,
        verdict: BlockVerdict,
        attempts: u32,
    },
    #[error("Cancelled")]
    Cancelled,
}
