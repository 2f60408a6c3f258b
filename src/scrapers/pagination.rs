//! Next-page detection.
//!
//! Strategies, tried in order until one produces a target:
//! 1. configured "next" selectors
//! 2. anchors or buttons whose text is a next token ("Next", "»")
//! 3. incrementing a page number found in the current URL
//! 4. a numbered pagination link for the following page
//!
//! The cursor remembers every visited URL; a candidate pointing at one of
//! them ends pagination instead of looping.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::error::{ConfigError, PaginationCycle};
use super::extract::{document_base_url, normalize_text, resolve_url};
use super::fetch::PageHandle;
use crate::config::PaginationConfig;
use crate::models::Record;

/// How to reach the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPageAction {
    FollowLink { url: String },
    ClickElement { selector: String },
}

/// Whether the fetcher can click elements or only follow links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    Link,
    Click,
}

/// Which heuristic located the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStrategy {
    NextSelector,
    TextPattern,
    UrlIncrement,
    NumberedLink,
}

impl fmt::Display for PaginationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaginationStrategy::NextSelector => "next selector",
            PaginationStrategy::TextPattern => "text pattern",
            PaginationStrategy::UrlIncrement => "url increment",
            PaginationStrategy::NumberedLink => "numbered link",
        };
        f.write_str(name)
    }
}

/// Outcome of inspecting a page for continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageDecision {
    Next {
        action: NextPageAction,
        strategy: PaginationStrategy,
    },
    /// No strategy found a next page.
    Exhausted,
    /// The candidate was already visited.
    Cycle { target: String },
}

/// Position of a scrape session within the result set.
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    page_number: u32,
    current_url: String,
    visited: HashSet<String>,
    fingerprints: HashSet<String>,
}

impl PaginationCursor {
    pub fn new(start_url: &str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(url_key(start_url));
        Self {
            page_number: 1,
            current_url: start_url.to_string(),
            visited,
            fingerprints: HashSet::new(),
        }
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.visited.contains(&url_key(url))
    }

    /// Move to a new URL. Fails if it was already visited.
    pub fn advance(&mut self, url: &str) -> Result<(), PaginationCycle> {
        if !self.visited.insert(url_key(url)) {
            return Err(PaginationCycle {
                target: url.to_string(),
            });
        }
        self.page_number += 1;
        self.current_url = url.to_string();
        Ok(())
    }

    /// Move to the next page after an in-page action (click). The URL may
    /// stay the same.
    pub fn advance_in_place(&mut self, final_url: &str) {
        self.visited.insert(url_key(final_url));
        self.page_number += 1;
        self.current_url = final_url.to_string();
    }

    /// Record where the current page actually ended up (redirects, clicks).
    /// Returns false if that location was already visited.
    pub fn relocate(&mut self, final_url: &str) -> bool {
        self.current_url = final_url.to_string();
        self.visited.insert(url_key(final_url))
    }

    /// Remember a page's content fingerprint. Returns false if seen before.
    pub fn record_fingerprint(&mut self, fingerprint: String) -> bool {
        self.fingerprints.insert(fingerprint)
    }
}

/// Visited-set key: the URL without its fragment.
fn url_key(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().split('#').next().unwrap_or_default().to_string(),
    }
}

/// Content fingerprint of a page's records, ignoring metadata.
pub fn page_fingerprint(records: &[Record]) -> String {
    let mut hasher = blake3::Hasher::new();
    for record in records {
        for (name, value) in &record.fields {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.to_flat_string().as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&[1]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Decides whether another page exists and how to reach it.
#[derive(Debug)]
pub struct PaginationNavigator {
    mode: NavigationMode,
    next_selectors: Vec<Selector>,
    tokens: Vec<String>,
    clickables: Selector,
    numbered_selectors: Vec<Selector>,
    query_param: Option<Regex>,
    path_segment: Regex,
}

impl PaginationNavigator {
    pub fn new(config: &PaginationConfig, mode: NavigationMode) -> Result<Self, ConfigError> {
        let compile = |raw: &str| {
            Selector::parse(raw).map_err(|_| ConfigError::InvalidSelector {
                context: "pagination".to_string(),
                selector: raw.to_string(),
            })
        };

        let next_selectors = config
            .next_selectors
            .iter()
            .map(|s| compile(s))
            .collect::<Result<Vec<_>, _>>()?;
        let numbered_selectors = config
            .numbered_selectors
            .iter()
            .map(|s| compile(s))
            .collect::<Result<Vec<_>, _>>()?;
        let clickables = compile("a, button, [role='button'], input[type='submit'], input[type='button']")?;

        let query_param = if config.page_params.is_empty() {
            None
        } else {
            let names: Vec<String> = config.page_params.iter().map(|p| regex::escape(p)).collect();
            let pattern = format!(r"([?&](?:{})=)(\d+)", names.join("|"));
            Some(Regex::new(&pattern).map_err(|e| {
                ConfigError::InvalidSettings(format!("page parameter pattern: {}", e))
            })?)
        };
        let path_segment = Regex::new(r"(/page/)(\d+)")
            .map_err(|e| ConfigError::InvalidSettings(format!("page path pattern: {}", e)))?;

        Ok(Self {
            mode,
            next_selectors,
            tokens: config
                .next_tokens
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            clickables,
            numbered_selectors,
            query_param,
            path_segment,
        })
    }

    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    /// Find the next page for a fetched page, or `None` at the end.
    pub fn next_page(
        &self,
        page: &PageHandle,
        cursor: &PaginationCursor,
    ) -> Option<NextPageAction> {
        let document = page.document();
        match self.decide(&document, &page.final_url, cursor) {
            PageDecision::Next { action, .. } => Some(action),
            PageDecision::Exhausted | PageDecision::Cycle { .. } => None,
        }
    }

    /// Run the strategy waterfall against a parsed page.
    pub fn decide(
        &self,
        document: &Html,
        page_url: &str,
        cursor: &PaginationCursor,
    ) -> PageDecision {
        let base = document_base_url(document, page_url);
        let base = base.as_ref();

        let found = self
            .by_next_selector(document, base)
            .map(|a| (a, PaginationStrategy::NextSelector))
            .or_else(|| {
                self.by_text_pattern(document, base)
                    .map(|a| (a, PaginationStrategy::TextPattern))
            })
            .or_else(|| {
                self.by_url_increment(cursor.current_url())
                    .map(|url| (NextPageAction::FollowLink { url }, PaginationStrategy::UrlIncrement))
            })
            .or_else(|| {
                self.by_numbered_link(document, base, cursor.page_number() + 1)
                    .map(|a| (a, PaginationStrategy::NumberedLink))
            });

        let Some((action, strategy)) = found else {
            debug!("No next page found on page {}", cursor.page_number());
            return PageDecision::Exhausted;
        };

        if let NextPageAction::FollowLink { url } = &action {
            if cursor.has_visited(url) {
                warn!("Pagination cycle: {} already visited", url);
                return PageDecision::Cycle { target: url.clone() };
            }
        }

        debug!("Next page via {}: {:?}", strategy, action);
        PageDecision::Next { action, strategy }
    }

    fn by_next_selector(&self, document: &Html, base: Option<&Url>) -> Option<NextPageAction> {
        for selector in &self.next_selectors {
            for element in document.select(selector) {
                if is_disabled(element) {
                    continue;
                }
                if let Some(url) = usable_href(element, base) {
                    return Some(NextPageAction::FollowLink { url });
                }
                if self.mode == NavigationMode::Click {
                    return Some(NextPageAction::ClickElement {
                        selector: css_path(element),
                    });
                }
            }
        }
        None
    }

    fn by_text_pattern(&self, document: &Html, base: Option<&Url>) -> Option<NextPageAction> {
        for element in document.select(&self.clickables) {
            if is_disabled(element) || !self.matches_token(&label(element)) {
                continue;
            }
            match self.mode {
                NavigationMode::Click => {
                    return Some(NextPageAction::ClickElement {
                        selector: css_path(element),
                    })
                }
                NavigationMode::Link => {
                    if let Some(url) = usable_href(element, base) {
                        return Some(NextPageAction::FollowLink { url });
                    }
                }
            }
        }
        None
    }

    /// Exact token, or the token plus punctuation only ("Next »").
    fn matches_token(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        if text.is_empty() {
            return false;
        }
        self.tokens.iter().any(|token| {
            text == *token
                || (text.contains(token.as_str())
                    && text
                        .replacen(token.as_str(), "", 1)
                        .chars()
                        .all(|c| !c.is_alphanumeric()))
        })
    }

    /// Increment the first page number found in the URL.
    ///
    /// Substring based: with several numeric parameters only the first
    /// recognised name is touched.
    pub fn by_url_increment(&self, current_url: &str) -> Option<String> {
        let patterns = self.query_param.iter().chain(std::iter::once(&self.path_segment));
        for pattern in patterns {
            if let Some(caps) = pattern.captures(current_url) {
                let (whole, prefix, number) = (caps.get(0)?, caps.get(1)?, caps.get(2)?);
                let next = number.as_str().parse::<u64>().ok()?.checked_add(1)?;
                let mut url = String::with_capacity(current_url.len() + 1);
                url.push_str(&current_url[..whole.start()]);
                url.push_str(prefix.as_str());
                url.push_str(&next.to_string());
                url.push_str(&current_url[whole.end()..]);
                return Some(url);
            }
        }
        None
    }

    fn by_numbered_link(
        &self,
        document: &Html,
        base: Option<&Url>,
        target_page: u32,
    ) -> Option<NextPageAction> {
        let wanted = target_page.to_string();
        for selector in &self.numbered_selectors {
            for element in document.select(selector) {
                if is_disabled(element) || normalize_text(element) != wanted {
                    continue;
                }
                if let Some(url) = usable_href(element, base) {
                    return Some(NextPageAction::FollowLink { url });
                }
                if self.mode == NavigationMode::Click {
                    return Some(NextPageAction::ClickElement {
                        selector: css_path(element),
                    });
                }
            }
        }
        None
    }
}

/// Visible text, falling back to aria-label, title or value.
fn label(element: ElementRef<'_>) -> String {
    let text = normalize_text(element);
    if !text.is_empty() {
        return text;
    }
    let attrs = element.value();
    ["aria-label", "title", "value"]
        .iter()
        .find_map(|a| attrs.attr(a))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn usable_href(element: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let href = element.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
        return None;
    }
    Some(resolve_url(base, href))
}

/// Disabled controls, including ones inside a disabled pagination item.
fn is_disabled(element: ElementRef<'_>) -> bool {
    let el = element.value();
    if el.attr("disabled").is_some() || el.attr("aria-disabled") == Some("true") {
        return true;
    }
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap).take(2))
        .any(|e| e.value().classes().any(|c| c == "disabled"))
}

/// A selector that uniquely addresses `element` in its document.
pub fn css_path(element: ElementRef<'_>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(element);

    while let Some(el) = current {
        let tag = el.value().name();
        if let Some(id) = el.value().id().filter(|id| is_identifier(id)) {
            segments.push(format!("#{}", id));
            break;
        }
        if tag == "html" {
            segments.push(tag.to_string());
            break;
        }
        let index = 1 + el
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|s| s.value().name() == tag)
            .count();
        segments.push(format!("{}:nth-of-type({})", tag, index));
        current = el.parent().and_then(ElementRef::wrap);
    }

    segments.reverse();
    segments.join(" > ")
}

fn is_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
