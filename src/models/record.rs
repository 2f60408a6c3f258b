//! Extracted record type.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;

/// Metadata columns appended to every record, in output order.
pub const METADATA_COLUMNS: &[&str] = &["page_number", "scraped_at", "source_url"];

/// Value of a single extracted field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    /// All matches of a multi-valued field, in document order.
    List(Vec<String>),
}

impl FieldValue {
    pub fn empty() -> Self {
        FieldValue::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::List(items) => items.iter().all(|s| s.is_empty()),
        }
    }

    /// Flatten to a single string (multi-values joined with `; `).
    pub fn to_flat_string(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items.join("; "),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }
}

/// One extracted product record.
///
/// Fields keep the configured order and every configured field is present,
/// empty or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub fields: Vec<(String, FieldValue)>,
    /// Page on which the record was found (1-based).
    pub page_number: u32,
    pub scraped_at: DateTime<Utc>,
    pub source_url: String,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Text value of a field, or `None` for missing and multi-valued fields.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// True when every configured field came back empty.
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, value)| value.is_empty())
    }

    pub fn scraped_at_string(&self) -> String {
        self.scraped_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + METADATA_COLUMNS.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("page_number", &self.page_number)?;
        map.serialize_entry("scraped_at", &self.scraped_at_string())?;
        map.serialize_entry("source_url", &self.source_url)?;
        map.end()
    }
}
