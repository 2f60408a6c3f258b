//! Rate controller configuration.

use std::time::Duration;

use crate::config::Settings;

/// Successful requests before the minimum delay starts creeping upward.
pub const SLOWDOWN_AFTER_REQUESTS: u64 = 10;

/// Growth of the minimum delay per request past the slowdown threshold.
pub const SLOWDOWN_FACTOR: f64 = 1.1;

/// Ceiling for the crept-up minimum delay.
pub const SLOWDOWN_CAP: Duration = Duration::from_secs(10);

/// Longest server-requested wait honoured before a retry.
pub const MAX_DEFERRAL: Duration = Duration::from_secs(300);

/// Configuration for request pacing and backoff.
#[derive(Debug, Clone)]
pub struct RateControlConfig {
    /// Lower bound of the jittered delay.
    pub min_delay: Duration,
    /// Upper bound of the jittered delay.
    pub max_delay: Duration,
    /// Multiplier growth per failure.
    pub backoff_factor: f64,
    /// Ceiling for the backoff multiplier.
    pub max_multiplier: f64,
    /// Rotate through the browser user-agent pool.
    pub rotate_user_agents: bool,
    pub proxies: Vec<String>,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl RateControlConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_delay: Duration::from_secs_f64(settings.min_delay),
            max_delay: Duration::from_secs_f64(settings.max_delay),
            backoff_factor: settings.backoff_factor,
            max_multiplier: settings.max_backoff_multiplier,
            rotate_user_agents: settings.rotate_user_agents,
            proxies: settings.proxy_list.clone(),
        }
    }
}
