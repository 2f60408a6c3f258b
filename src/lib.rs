//! pagetrawl - paginating product-listing scraper.
//!
//! Extracts structured records from listing pages through one of three
//! interchangeable fetch strategies (static HTTP, element-polling browser,
//! network-idle browser), follows pagination across result sets, and paces
//! requests with an adaptive backoff and identity-rotation controller.

pub mod config;
pub mod export;
pub mod models;
pub mod presets;
pub mod scrapers;

pub use config::{OutputFormat, PaginationConfig, Settings};
pub use models::{FieldValue, QualityWarning, Record, ScrapeResult, ScrapeStats, SessionStatus};
pub use scrapers::{FieldSpec, ScrapeRequest, Scraper, ScraperType};
