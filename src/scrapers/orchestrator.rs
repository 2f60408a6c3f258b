//! Scrape session driver.
//!
//! Runs the fetch → detect block → extract → validate → paginate loop for
//! one target. Per-page failures become retries or a terminal status;
//! only configuration problems are reported as errors, and only from the
//! constructor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use scraper::Selector;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::block::BlockDetector;
use super::error::{AbortReason, ConfigError, FetchError};
use super::extract::{FieldExtractor, FieldSpec, PageContext};
use super::fetch::{Identity, PageFetcher, PageHandle};
use super::http_client::HttpFetcher;
use super::pagination::{
    page_fingerprint, NavigationMode, NextPageAction, PageDecision, PaginationCursor,
    PaginationNavigator,
};
use super::rate_limiter::{RateControlConfig, RateController};
use super::ScraperType;
use crate::config::Settings;
use crate::models::{fill_rates, QualityWarning, Record, ScrapeResult, ScrapeStats, SessionStatus};

/// What to scrape and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub target_url: String,
    /// Selector matching one product container per record.
    pub product_selector: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub scraper_type: ScraperType,
    /// Stop once this many records are collected.
    #[serde(default)]
    pub max_products: Option<usize>,
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Idle,
    Fetching,
    DetectingBlock,
    Extracting,
    Paginating,
    Done,
    Aborted,
}

/// How a page fetch ended when it did not yield a usable page.
enum PageEnd {
    /// Past the last page (404/410 after page 1).
    Finished,
    Abort(AbortReason),
}

/// One page after extraction and pagination analysis.
struct ProcessedPage {
    containers: usize,
    records: Vec<Record>,
    decision: PageDecision,
}

/// A scrape session over one target.
pub struct Scraper {
    request: ScrapeRequest,
    settings: Arc<Settings>,
    container: Selector,
    extractor: FieldExtractor,
    navigator: PaginationNavigator,
    detector: BlockDetector,
    rate: RateController,
    fetcher: Box<dyn PageFetcher>,
    cancel: CancellationToken,
    state: ScrapeState,
}

impl Scraper {
    /// Create a session using the fetch strategy named by the request.
    pub fn new(request: ScrapeRequest, settings: Arc<Settings>) -> Result<Self, ConfigError> {
        let fetcher = build_fetcher(&request, &settings)?;
        Self::with_fetcher(request, settings, fetcher)
    }

    /// Create a session with a caller-supplied fetcher.
    pub fn with_fetcher(
        request: ScrapeRequest,
        settings: Arc<Settings>,
        fetcher: Box<dyn PageFetcher>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        Url::parse(&request.target_url).map_err(|e| ConfigError::InvalidUrl {
            url: request.target_url.clone(),
            message: e.to_string(),
        })?;

        if request.product_selector.trim().is_empty() {
            return Err(ConfigError::EmptySelectorList("product selector".to_string()));
        }
        let container = Selector::parse(request.product_selector.trim()).map_err(|_| {
            ConfigError::InvalidSelector {
                context: "product selector".to_string(),
                selector: request.product_selector.clone(),
            }
        })?;

        if request.fields.is_empty() {
            return Err(ConfigError::InvalidSettings(
                "at least one field is required".to_string(),
            ));
        }
        let extractor = FieldExtractor::new(&request.fields)?;

        let mode = if fetcher.supports_click() {
            NavigationMode::Click
        } else {
            NavigationMode::Link
        };
        let navigator = PaginationNavigator::new(&settings.pagination, mode)?;

        Ok(Self {
            detector: BlockDetector::from_settings(&settings),
            rate: RateController::new(RateControlConfig::from_settings(&settings)),
            request,
            settings,
            container,
            extractor,
            navigator,
            fetcher,
            cancel: CancellationToken::new(),
            state: ScrapeState::Idle,
        })
    }

    /// Token that cancels the session; partial results are kept.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ScrapeState {
        self.state
    }

    pub fn rate_controller(&self) -> &RateController {
        &self.rate
    }

    pub fn request(&self) -> &ScrapeRequest {
        &self.request
    }

    /// Run the session to completion.
    ///
    /// Always returns a result; an aborted session carries the reason and
    /// whatever was collected before it. The fetcher is closed on every
    /// path.
    pub async fn scrape(&mut self) -> ScrapeResult {
        let started = Instant::now();
        let mut stats = ScrapeStats::default();
        let mut records = Vec::new();

        info!(
            "Scraping {} with {} fetcher",
            self.request.target_url,
            self.fetcher.kind()
        );

        let status = self.run(&mut records, &mut stats).await;
        self.fetcher.close().await;

        self.state = match status {
            SessionStatus::Done => ScrapeState::Done,
            SessionStatus::Aborted(_) => ScrapeState::Aborted,
        };

        let fields = self.extractor.field_names();
        stats.summarize(&records, &fields);
        stats.elapsed_seconds = started.elapsed().as_secs_f64();

        match &status {
            SessionStatus::Done => info!(
                "Scrape finished: {} records from {} pages in {:.1}s",
                stats.total_records, stats.total_pages, stats.elapsed_seconds
            ),
            SessionStatus::Aborted(reason) => warn!(
                "Scrape aborted after {} records from {} pages: {}",
                stats.total_records, stats.total_pages, reason
            ),
        }

        ScrapeResult {
            records,
            stats,
            status,
            fields,
            target_url: self.request.target_url.clone(),
        }
    }

    async fn run(&mut self, records: &mut Vec<Record>, stats: &mut ScrapeStats) -> SessionStatus {
        self.state = ScrapeState::Fetching;
        let mut cursor = PaginationCursor::new(&self.request.target_url);
        let mut action = NextPageAction::FollowLink {
            url: self.request.target_url.clone(),
        };
        let max_pages = self.settings.max_pages;

        loop {
            if self.cancel.is_cancelled() {
                return SessionStatus::Aborted(AbortReason::Cancelled);
            }

            let page_number = cursor.page_number();
            let page = match self.fetch_page(&action, page_number, stats).await {
                Ok(page) => page,
                Err(PageEnd::Finished) => return SessionStatus::Done,
                Err(PageEnd::Abort(reason)) => return SessionStatus::Aborted(reason),
            };

            let arrived_new = cursor.relocate(&page.final_url);
            if !arrived_new
                && matches!(action, NextPageAction::FollowLink { .. })
                && page.final_url != page.requested_url
            {
                warn!(
                    "Page {} redirected to already visited {}",
                    page_number, page.final_url
                );
                return SessionStatus::Done;
            }

            self.state = ScrapeState::Extracting;
            let processed = self.process(&page, page_number, &cursor);

            if processed.containers == 0 && page_number > 1 {
                debug!("Page {} has no products, stopping", page_number);
                return SessionStatus::Done;
            }

            self.validate(&processed, page_number, stats);

            if !processed.records.is_empty()
                && !cursor.record_fingerprint(page_fingerprint(&processed.records))
            {
                warn!(
                    "Pagination cycle: page {} repeats earlier content",
                    page_number
                );
                return SessionStatus::Done;
            }

            stats.total_pages += 1;
            let batch = processed.records.len();
            records.extend(processed.records);
            info!(
                "Page {}: {} records ({} total)",
                page_number,
                batch,
                records.len()
            );

            self.state = ScrapeState::Paginating;

            if let Some(limit) = self.request.max_products {
                if records.len() >= limit {
                    records.truncate(limit);
                    info!("Reached max products ({})", limit);
                    return SessionStatus::Done;
                }
            }
            if page_number >= max_pages {
                info!("Reached max pages ({})", max_pages);
                return SessionStatus::Done;
            }
            if self.cancel.is_cancelled() {
                return SessionStatus::Aborted(AbortReason::Cancelled);
            }

            action = match processed.decision {
                PageDecision::Exhausted => {
                    info!("No more pages after page {}", page_number);
                    return SessionStatus::Done;
                }
                PageDecision::Cycle { target } => {
                    warn!("Pagination cycle at {}, stopping", target);
                    return SessionStatus::Done;
                }
                PageDecision::Next { action, strategy } => {
                    debug!("Page {} -> next via {}", page_number, strategy);
                    match &action {
                        NextPageAction::FollowLink { url } => {
                            if let Err(cycle) = cursor.advance(url) {
                                warn!("{}", cycle);
                                return SessionStatus::Done;
                            }
                        }
                        NextPageAction::ClickElement { .. } => {
                            let here = cursor.current_url().to_string();
                            cursor.advance_in_place(&here);
                        }
                    }
                    action
                }
            };
            self.state = ScrapeState::Fetching;
        }
    }

    /// Parse, extract and decide on pagination in one synchronous pass.
    fn process(&self, page: &PageHandle, page_number: u32, cursor: &PaginationCursor) -> ProcessedPage {
        let document = page.document();
        let ctx = PageContext::for_document(&document, &page.final_url, page_number);
        let (containers, records) = self.extractor.extract_all(&document, &self.container, &ctx);
        let decision = self.navigator.decide(&document, &page.final_url, cursor);
        ProcessedPage {
            containers,
            records,
            decision,
        }
    }

    fn validate(&self, page: &ProcessedPage, page_number: u32, stats: &mut ScrapeStats) {
        let mut found = Vec::new();
        if page.containers == 0 {
            found.push(QualityWarning::NoContainers { page_number });
        } else if page.records.is_empty() {
            found.push(QualityWarning::EmptyBatch {
                page_number,
                containers: page.containers,
            });
        } else {
            for (field, rate) in fill_rates(&page.records, &self.extractor.field_names()) {
                if rate < self.settings.min_fill_rate {
                    found.push(QualityWarning::LowFillRate {
                        page_number,
                        field,
                        rate,
                    });
                }
            }
        }
        for warning in found {
            warn!("Quality warning: {}", warning);
            stats.quality_warnings.push(warning);
        }
    }

    /// Fetch one page, retrying failures and blocks up to the ceiling.
    async fn fetch_page(
        &mut self,
        action: &NextPageAction,
        page_number: u32,
        stats: &mut ScrapeStats,
    ) -> Result<PageHandle, PageEnd> {
        let max_attempts = 1 + self.settings.max_retries;
        let mut blocked = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.state = ScrapeState::Fetching;

            let wait = self.rate.delay_before_next();
            if !wait.is_zero() && !pause(self.cancel.clone(), wait).await {
                return Err(PageEnd::Abort(AbortReason::Cancelled));
            }
            let identity = self.rate.identity_for_request(blocked);
            blocked = false;
            self.rate.mark_request();
            stats.requests += 1;

            let outcome = match self.attempt(action, &identity).await {
                Some(outcome) => outcome,
                None => return Err(PageEnd::Abort(AbortReason::Cancelled)),
            };

            let error = match outcome {
                Ok(page) => {
                    self.state = ScrapeState::DetectingBlock;
                    let verdict = self.detector.inspect(page.status, &page.body);
                    if verdict.is_blocked() {
                        stats.blocks += 1;
                        self.rate.record_failure();
                        if let Some(wait) = page.retry_after() {
                            self.rate.defer(wait);
                        }
                        if attempt >= max_attempts {
                            return Err(PageEnd::Abort(AbortReason::Blocked {
                                url: page.final_url,
                                verdict,
                                attempts: attempt,
                            }));
                        }
                        warn!(
                            "Page {} blocked ({}), retry {}/{}",
                            page_number, verdict, attempt, self.settings.max_retries
                        );
                        blocked = true;
                        stats.retries += 1;
                        continue;
                    }

                    if page.is_success() {
                        debug!(
                            "Fetched page {} ({}) HTTP {} on attempt {}",
                            page_number, page.final_url, page.status, attempt
                        );
                        self.rate.record_success();
                        return Ok(page);
                    }
                    FetchError::Status {
                        url: page.final_url,
                        status: page.status,
                    }
                }
                Err(error) => error,
            };

            self.rate.record_failure();

            if let FetchError::Status { status: 404 | 410, .. } = error {
                if page_number > 1 {
                    info!("Page {} does not exist, pagination finished", page_number);
                    return Err(PageEnd::Finished);
                }
            }

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(PageEnd::Abort(AbortReason::Fetch {
                    page_number,
                    attempts: attempt,
                    error,
                }));
            }

            warn!(
                "Page {} attempt {} failed: {}, retrying",
                page_number, attempt, error
            );
            stats.retries += 1;
        }
    }

    /// One fetch or click. `None` when cancelled mid-flight.
    async fn attempt(
        &mut self,
        action: &NextPageAction,
        identity: &Identity,
    ) -> Option<Result<PageHandle, FetchError>> {
        let cancel = self.cancel.clone();
        let fetch = async {
            match action {
                NextPageAction::FollowLink { url } => self.fetcher.fetch(url, identity).await,
                NextPageAction::ClickElement { selector } => {
                    self.fetcher.click(selector, identity).await
                }
            }
        };
        tokio::select! {
            result = fetch => Some(result),
            _ = cancel.cancelled() => None,
        }
    }

}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(cancel: CancellationToken, wait: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Build the fetch strategy for a request.
fn build_fetcher(
    request: &ScrapeRequest,
    settings: &Settings,
) -> Result<Box<dyn PageFetcher>, ConfigError> {
    match request.scraper_type {
        ScraperType::Static => Ok(Box::new(HttpFetcher::from_settings(settings))),
        #[cfg(feature = "browser")]
        ScraperType::Browser => Ok(Box::new(super::browser::BrowserFetcher::new(
            super::browser::BrowserFetchConfig::sync(settings, request.product_selector.trim()),
        ))),
        #[cfg(feature = "browser")]
        ScraperType::AsyncBrowser => Ok(Box::new(super::browser::BrowserFetcher::new(
            super::browser::BrowserFetchConfig::network_idle(settings),
        ))),
        #[cfg(not(feature = "browser"))]
        ScraperType::Browser | ScraperType::AsyncBrowser => Err(ConfigError::BrowserUnavailable),
    }
}
