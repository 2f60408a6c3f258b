//! Data models for scrape sessions.

mod record;
mod result;

pub use record::{FieldValue, Record, METADATA_COLUMNS};
pub use result::{fill_rates, QualityWarning, ScrapeResult, ScrapeStats, SessionStatus};
