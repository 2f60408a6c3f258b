//! Scrape session results and statistics.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::record::Record;
use crate::scrapers::error::AbortReason;

/// Post-extraction quality finding. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityWarning {
    /// The product selector matched nothing on this page.
    NoContainers { page_number: u32 },
    /// Containers matched but every one produced a blank record.
    EmptyBatch { page_number: u32, containers: usize },
    /// A field was filled on fewer records than the configured threshold.
    LowFillRate {
        page_number: u32,
        field: String,
        rate: f64,
    },
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityWarning::NoContainers { page_number } => {
                write!(f, "page {}: no product containers matched", page_number)
            }
            QualityWarning::EmptyBatch {
                page_number,
                containers,
            } => write!(
                f,
                "page {}: {} containers matched but no record had data",
                page_number, containers
            ),
            QualityWarning::LowFillRate {
                page_number,
                field,
                rate,
            } => write!(
                f,
                "page {}: field '{}' filled on only {:.0}% of records",
                page_number,
                field,
                rate * 100.0
            ),
        }
    }
}

/// Summary statistics for a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeStats {
    pub total_records: usize,
    pub total_pages: u32,
    pub elapsed_seconds: f64,
    /// Fraction of records with a non-empty value, per configured field.
    pub per_field_fill_rate: BTreeMap<String, f64>,
    /// Configured fields that were filled on at least one record.
    pub unique_fields: Vec<String>,
    pub requests: u64,
    pub retries: u64,
    pub blocks: u64,
    pub quality_warnings: Vec<QualityWarning>,
}

impl ScrapeStats {
    /// Recompute record-derived figures from the final record list.
    pub fn summarize(&mut self, records: &[Record], fields: &[String]) {
        self.total_records = records.len();
        self.per_field_fill_rate = fill_rates(records, fields).into_iter().collect();
        self.unique_fields = fields
            .iter()
            .filter(|f| self.per_field_fill_rate.get(*f).copied().unwrap_or(0.0) > 0.0)
            .cloned()
            .collect();
    }
}

/// Fill rate of each field over `records`, in field order.
/// An empty record list yields a rate of 0 for every field.
pub fn fill_rates(records: &[Record], fields: &[String]) -> Vec<(String, f64)> {
    fields
        .iter()
        .map(|field| {
            if records.is_empty() {
                return (field.clone(), 0.0);
            }
            let filled = records
                .iter()
                .filter(|r| r.get(field).is_some_and(|v| !v.is_empty()))
                .count();
            (field.clone(), filled as f64 / records.len() as f64)
        })
        .collect()
}

/// Terminal state of a session.
#[derive(Debug, Clone)]
pub enum SessionStatus {
    Done,
    Aborted(AbortReason),
}

impl SessionStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, SessionStatus::Done)
    }
}

/// Records plus summary, handed to the export layer.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub records: Vec<Record>,
    pub stats: ScrapeStats,
    pub status: SessionStatus,
    /// Configured field names, in order (export header).
    pub fields: Vec<String>,
    pub target_url: String,
}

impl ScrapeResult {
    /// The error that aborted the session, if any.
    pub fn error(&self) -> Option<&AbortReason> {
        match &self.status {
            SessionStatus::Done => None,
            SessionStatus::Aborted(reason) => Some(reason),
        }
    }
}
