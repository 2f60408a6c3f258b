//! Configuration management for pagetrawl.
//!
//! `Settings` is an immutable snapshot handed to a scrape session. It is
//! loaded once (TOML file, then `PAGETRAWL_*` environment overrides) and
//! never mutated after the session starts.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scrapers::error::ConfigError;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "pagetrawl.toml";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "PAGETRAWL_";

/// Largest accepted `max_delay`, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Largest accepted `max_backoff_multiplier`.
pub const MAX_BACKOFF_MULTIPLIER: f64 = 1000.0;

/// Export format for scrape results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(ConfigError::InvalidSettings(format!(
                "unknown output format '{}'",
                other
            ))),
        }
    }
}

/// Pagination heuristics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// CSS selectors for an explicit "next" control, tried in order.
    #[serde(default = "default_next_selectors")]
    pub next_selectors: Vec<String>,
    /// Visible-text tokens identifying a "next" control.
    #[serde(default = "default_next_tokens")]
    pub next_tokens: Vec<String>,
    /// Query parameter names recognised as a page number.
    #[serde(default = "default_page_params")]
    pub page_params: Vec<String>,
    /// Containers holding numbered page links.
    #[serde(default = "default_numbered_selectors")]
    pub numbered_selectors: Vec<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            next_selectors: default_next_selectors(),
            next_tokens: default_next_tokens(),
            page_params: default_page_params(),
            numbered_selectors: default_numbered_selectors(),
        }
    }
}

fn default_next_selectors() -> Vec<String> {
    [
        "a[rel='next']",
        "a[aria-label*='Next']",
        ".pagination .next a",
        ".pagination a[rel='next']",
        "li.next a",
        "a.next",
        ".pagination-next a",
        "a.pagination-next",
        "a[class*='next']",
        "button[class*='next']",
        "[data-testid*='next']",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_next_tokens() -> Vec<String> {
    ["Next", "Next page", "→", "»", "›"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_page_params() -> Vec<String> {
    ["page", "p", "pg", "pagenum", "page_number", "pageNumber"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_numbered_selectors() -> Vec<String> {
    [
        ".pagination a",
        ".pager a",
        ".page-numbers a",
        "nav[aria-label*='agination'] a",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Lower bound of the inter-request delay, in seconds.
    pub min_delay: f64,
    /// Upper bound of the inter-request delay, in seconds.
    pub max_delay: f64,
    /// HTTP request timeout in seconds (static strategy).
    pub request_timeout: u64,
    /// Retries per page after the first attempt.
    pub max_retries: u32,
    /// Backoff multiplier growth per failure (must be > 1).
    pub backoff_factor: f64,
    /// Ceiling for the backoff multiplier.
    pub max_backoff_multiplier: f64,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Browser page-load timeout in seconds.
    pub page_load_timeout: u64,
    /// Quiescence window for the network-idle browser strategy, in milliseconds.
    pub network_idle_window_ms: u64,
    pub rotate_user_agents: bool,
    pub proxy_list: Vec<String>,
    /// Hard ceiling on pages processed per session.
    pub max_pages: u32,
    pub output_format: OutputFormat,
    pub output_dir: PathBuf,
    /// Status codes treated as rate limiting.
    pub blocking_status_codes: Vec<u16>,
    /// Case-insensitive body substrings treated as a CAPTCHA challenge.
    pub captcha_indicators: Vec<String>,
    /// Per-page field fill rate below which a quality warning is reported.
    pub min_fill_rate: f64,
    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    pub remote_browser_url: Option<String>,
    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,
    pub pagination: PaginationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_delay: 1.0,
            max_delay: 5.0,
            request_timeout: 30,
            max_retries: 3,
            backoff_factor: 1.5,
            max_backoff_multiplier: 8.0,
            headless: true,
            window_width: 1920,
            window_height: 1080,
            page_load_timeout: 30,
            network_idle_window_ms: 500,
            rotate_user_agents: true,
            proxy_list: Vec::new(),
            max_pages: 10,
            output_format: OutputFormat::Json,
            output_dir: PathBuf::from("output"),
            blocking_status_codes: vec![429, 503],
            captcha_indicators: default_captcha_indicators(),
            min_fill_rate: 0.5,
            remote_browser_url: None,
            chrome_args: Vec::new(),
            pagination: PaginationConfig::default(),
        }
    }
}

pub fn default_captcha_indicators() -> Vec<String> {
    [
        "captcha",
        "verify you are human",
        "are you a robot",
        "security check",
        "cf-challenge",
        "distil_r_captcha",
        "incapsula incident",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Settings {
    /// Load settings from an explicit file, or `pagetrawl.toml` in the
    /// working directory if present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILENAME);
                default.exists().then_some(default)
            }
        };

        let mut settings = match candidate {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading settings from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::InvalidSettings(message) => ConfigError::Load {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse settings from TOML text. Missing keys take defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidSettings(e.to_string()))
    }

    /// Apply `PAGETRAWL_*` overrides using the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("MIN_DELAY") {
            self.min_delay = parse_env("MIN_DELAY", &v)?;
        }
        if let Some(v) = get("MAX_DELAY") {
            self.max_delay = parse_env("MAX_DELAY", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            self.request_timeout = parse_env("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("BACKOFF_FACTOR") {
            self.backoff_factor = parse_env("BACKOFF_FACTOR", &v)?;
        }
        if let Some(v) = get("HEADLESS") {
            self.headless = parse_env("HEADLESS", &v)?;
        }
        if let Some(v) = get("PAGE_LOAD_TIMEOUT") {
            self.page_load_timeout = parse_env("PAGE_LOAD_TIMEOUT", &v)?;
        }
        if let Some(v) = get("ROTATE_USER_AGENTS") {
            self.rotate_user_agents = parse_env("ROTATE_USER_AGENTS", &v)?;
        }
        if let Some(v) = get("PROXY_LIST") {
            self.proxy_list = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = get("MAX_PAGES") {
            self.max_pages = parse_env("MAX_PAGES", &v)?;
        }
        if let Some(v) = get("OUTPUT_FORMAT") {
            self.output_format = v.parse()?;
        }
        if let Some(v) = get("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BROWSER_URL") {
            self.remote_browser_url = Some(v).filter(|s| !s.is_empty());
        }

        Ok(())
    }

    /// Reject settings that would make pacing or pagination meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("min_delay", self.min_delay),
            ("max_delay", self.max_delay),
            ("backoff_factor", self.backoff_factor),
            ("max_backoff_multiplier", self.max_backoff_multiplier),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidSettings(format!(
                    "{} must be a finite number, got {}",
                    name, value
                )));
            }
        }
        if self.min_delay < 0.0 || self.max_delay < 0.0 {
            return Err(ConfigError::InvalidSettings(
                "delays must be non-negative".to_string(),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidSettings(format!(
                "min_delay ({}) exceeds max_delay ({})",
                self.min_delay, self.max_delay
            )));
        }
        if self.backoff_factor <= 1.0 {
            return Err(ConfigError::InvalidSettings(format!(
                "backoff_factor must be greater than 1, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay > MAX_DELAY_SECS {
            return Err(ConfigError::InvalidSettings(format!(
                "max_delay must be at most {} seconds, got {}",
                MAX_DELAY_SECS, self.max_delay
            )));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.max_backoff_multiplier) {
            return Err(ConfigError::InvalidSettings(format!(
                "max_backoff_multiplier must be between 1 and {}, got {}",
                MAX_BACKOFF_MULTIPLIER, self.max_backoff_multiplier
            )));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::InvalidSettings(
                "max_pages must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_fill_rate) {
            return Err(ConfigError::InvalidSettings(format!(
                "min_fill_rate must be between 0 and 1, got {}",
                self.min_fill_rate
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout)
    }

    pub fn network_idle_window(&self) -> Duration {
        Duration::from_millis(self.network_idle_window_ms)
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidSettings(format!(
            "{}{} has an invalid value '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.min_delay, 1.0);
        assert_eq!(settings.max_delay, 5.0);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.backoff_factor, 1.5);
        assert_eq!(settings.max_pages, 10);
        assert_eq!(settings.output_format, OutputFormat::Json);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            min_delay = 2.0
            max_pages = 3
            output_format = "csv"

            [pagination]
            next_tokens = ["Suivant"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.min_delay, 2.0);
        assert_eq!(settings.max_delay, 5.0);
        assert_eq!(settings.max_pages, 3);
        assert_eq!(settings.output_format, OutputFormat::Csv);
        assert_eq!(settings.pagination.next_tokens, vec!["Suivant"]);
        assert!(!settings.pagination.next_selectors.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PAGETRAWL_MAX_DELAY", "9.5"),
            ("PAGETRAWL_PROXY_LIST", "http://a:1, http://b:2"),
            ("PAGETRAWL_HEADLESS", "false"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.max_delay, 9.5);
        assert_eq!(settings.proxy_list, vec!["http://a:1", "http://b:2"]);
        assert!(!settings.headless);
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut settings = Settings::default();
        let result = settings.apply_env_overrides(|k| {
            (k == "PAGETRAWL_MAX_PAGES").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidSettings(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let settings = Settings {
            min_delay: 6.0,
            max_delay: 5.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_values() {
        let settings = Settings::from_toml("min_delay = 1.0\nmax_delay = inf").unwrap();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidSettings(_))
        ));

        let mut settings = Settings::default();
        settings
            .apply_env_overrides(|k| (k == "PAGETRAWL_MIN_DELAY").then(|| "nan".to_string()))
            .unwrap();
        assert!(settings.min_delay.is_nan());
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidSettings(_))
        ));

        let settings = Settings {
            backoff_factor: f64::NAN,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_backoff_ceiling() {
        let settings = Settings {
            max_backoff_multiplier: 1e300,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            max_delay: 1e300,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_growing_backoff() {
        let settings = Settings {
            backoff_factor: 1.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
