//! Mutable pacing state for one scrape session.

use std::time::{Duration, Instant};

/// State owned by the rate controller, mutated once per request.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Successful requests so far.
    pub request_count: u64,
    /// Start of the most recent request.
    pub last_request: Option<Instant>,
    /// Current backoff multiplier (1.0 when healthy).
    pub backoff_multiplier: f64,
    /// Current minimum delay after gradual slowdown.
    pub effective_min_delay: Duration,
    /// Earliest moment the next request may start (from Retry-After).
    pub not_before: Option<Instant>,
    /// Index of the current user agent in the pool.
    pub user_agent_index: Option<usize>,
    /// Index of the current proxy in the pool.
    pub proxy_index: Option<usize>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

impl SessionState {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            request_count: 0,
            last_request: None,
            backoff_multiplier: 1.0,
            effective_min_delay: min_delay,
            not_before: None,
            user_agent_index: None,
            proxy_index: None,
            consecutive_failures: 0,
        }
    }

    /// Time left before `delay` has passed since the last request.
    pub fn time_until_ready(&self, delay: Duration) -> Duration {
        let spacing = match self.last_request {
            Some(last) => delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        let deferred = self
            .not_before
            .map(|t| t.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);
        spacing.max(deferred)
    }
}
