//! Detection of rate limiting and bot challenges in fetched pages.
//!
//! Best effort: a clean verdict does not guarantee the page is genuine.

use std::fmt;

use tracing::warn;

use crate::config::Settings;

/// Outcome of inspecting a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockVerdict {
    Clear,
    /// Server answered with a blocking status code.
    RateLimited { status: u16 },
    /// Body contains a bot-challenge marker.
    CaptchaChallenge { indicator: String },
}

impl BlockVerdict {
    pub fn is_blocked(&self) -> bool {
        !matches!(self, BlockVerdict::Clear)
    }
}

impl fmt::Display for BlockVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockVerdict::Clear => write!(f, "clear"),
            BlockVerdict::RateLimited { status } => write!(f, "rate limited (HTTP {})", status),
            BlockVerdict::CaptchaChallenge { indicator } => {
                write!(f, "captcha challenge ('{}')", indicator)
            }
        }
    }
}

/// Classifies pages as clear, rate limited or challenged.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    blocking_status_codes: Vec<u16>,
    /// Lowercased markers.
    indicators: Vec<String>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl BlockDetector {
    pub fn new(blocking_status_codes: Vec<u16>, indicators: &[String]) -> Self {
        Self {
            blocking_status_codes,
            indicators: indicators
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.blocking_status_codes.clone(),
            &settings.captcha_indicators,
        )
    }

    /// Inspect a response. Status takes precedence over body markers.
    pub fn inspect(&self, status: u16, body: &str) -> BlockVerdict {
        if self.blocking_status_codes.contains(&status) {
            warn!("Blocking status code {}", status);
            return BlockVerdict::RateLimited { status };
        }

        if self.indicators.is_empty() {
            return BlockVerdict::Clear;
        }

        let lowered = body.to_lowercase();
        if let Some(indicator) = self.indicators.iter().find(|i| lowered.contains(i.as_str())) {
            warn!("CAPTCHA marker '{}' found in page", indicator);
            return BlockVerdict::CaptchaChallenge {
                indicator: indicator.clone(),
            };
        }

        BlockVerdict::Clear
    }
}
