//! Field extraction from product containers.
//!
//! Each field is an ordered chain of selector candidates. The first
//! candidate yielding a non-empty value wins.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::ConfigError;
use crate::models::{FieldValue, Record, METADATA_COLUMNS};

/// Attributes holding URLs that get resolved to absolute form.
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "data-src",
    "data-href",
    "data-url",
    "data-original",
    "poster",
    "action",
];

/// A named field and its selector fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Candidates tried left to right. `selector@attr` reads an attribute.
    pub selectors: Vec<String>,
    /// Attribute read by candidates that do not name their own.
    #[serde(default)]
    pub attribute: Option<String>,
    /// Collect every match instead of the first.
    #[serde(default)]
    pub multiple: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, selectors: &[&str]) -> Self {
        Self {
            name: name.into(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            attribute: None,
            multiple: false,
        }
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Parse `name:sel1|sel2` (also accepts comma separated candidates when
    /// no `|` is present).
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let (name, chain) = input
            .split_once(':')
            .ok_or_else(|| ConfigError::EmptySelectorList(input.trim().to_string()))?;
        let name = name.trim();
        let separator = if chain.contains('|') { '|' } else { ',' };
        let selectors: Vec<String> = chain
            .split(separator)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if selectors.is_empty() {
            return Err(ConfigError::EmptySelectorList(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            selectors,
            attribute: None,
            multiple: false,
        })
    }
}

/// How a field reads its value when no attribute is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Image,
    Link,
}

impl FieldKind {
    fn infer(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "image" | "img" | "photo" => FieldKind::Image,
            "link" => FieldKind::Link,
            _ => FieldKind::Text,
        }
    }
}

#[derive(Debug)]
struct Candidate {
    selector: Selector,
    attribute: Option<String>,
}

#[derive(Debug)]
struct CompiledField {
    name: String,
    kind: FieldKind,
    multiple: bool,
    candidates: Vec<Candidate>,
}

/// Page-level context attached to every record.
#[derive(Debug, Clone)]
pub struct PageContext {
    /// Base for relative URLs (honours `<base href>`).
    pub base_url: Option<Url>,
    pub source_url: String,
    pub page_number: u32,
    pub scraped_at: DateTime<Utc>,
}

impl PageContext {
    /// Build the context for a parsed page.
    pub fn for_document(document: &Html, source_url: &str, page_number: u32) -> Self {
        Self {
            base_url: document_base_url(document, source_url),
            source_url: source_url.to_string(),
            page_number,
            scraped_at: Utc::now(),
        }
    }
}

/// Resolve the effective base URL of a document.
pub fn document_base_url(document: &Html, page_url: &str) -> Option<Url> {
    let page = Url::parse(page_url).ok()?;
    let base = Selector::parse("base[href]").ok().and_then(|sel| {
        document
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| page.join(href.trim()).ok())
    });
    Some(base.unwrap_or(page))
}

/// Compiled field specifications.
#[derive(Debug)]
pub struct FieldExtractor {
    fields: Vec<CompiledField>,
}

impl FieldExtractor {
    /// Validate and compile the field specs.
    pub fn new(specs: &[FieldSpec]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(specs.len());

        for spec in specs {
            let name = spec.name.trim();
            if name.is_empty() || spec.selectors.iter().all(|s| s.trim().is_empty()) {
                return Err(ConfigError::EmptySelectorList(name.to_string()));
            }
            if METADATA_COLUMNS.contains(&name) {
                return Err(ConfigError::ReservedFieldName(name.to_string()));
            }
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicateField(name.to_string()));
            }

            let mut candidates = Vec::new();
            for raw in spec.selectors.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
                let (css, attribute) = split_attribute(raw);
                let selector =
                    Selector::parse(css).map_err(|_| ConfigError::InvalidSelector {
                        context: format!("field '{}'", name),
                        selector: raw.to_string(),
                    })?;
                candidates.push(Candidate {
                    selector,
                    attribute: attribute.or_else(|| spec.attribute.clone()),
                });
            }

            fields.push(CompiledField {
                name: name.to_string(),
                kind: FieldKind::infer(name),
                multiple: spec.multiple,
                candidates,
            });
        }

        Ok(Self { fields })
    }

    /// Configured field names, in output order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Extract one record from a product container.
    ///
    /// Every configured field is present in the result. Pure given its
    /// inputs.
    pub fn extract(&self, container: ElementRef<'_>, ctx: &PageContext) -> Record {
        let fields = self
            .fields
            .iter()
            .map(|field| (field.name.clone(), self.extract_field(field, container, ctx)))
            .collect();

        Record {
            fields,
            page_number: ctx.page_number,
            scraped_at: ctx.scraped_at,
            source_url: ctx.source_url.clone(),
        }
    }

    /// Extract records for every container matching `container_selector`.
    pub fn extract_all(
        &self,
        document: &Html,
        container_selector: &Selector,
        ctx: &PageContext,
    ) -> (usize, Vec<Record>) {
        let mut containers = 0;
        let mut records = Vec::new();
        for container in document.select(container_selector) {
            containers += 1;
            let record = self.extract(container, ctx);
            if !record.is_blank() {
                records.push(record);
            }
        }
        (containers, records)
    }

    fn extract_field(
        &self,
        field: &CompiledField,
        container: ElementRef<'_>,
        ctx: &PageContext,
    ) -> FieldValue {
        for candidate in &field.candidates {
            if field.multiple {
                let values: Vec<String> = container
                    .select(&candidate.selector)
                    .filter_map(|el| read_value(el, field.kind, candidate, ctx))
                    .collect();
                if !values.is_empty() {
                    return FieldValue::List(values);
                }
            } else {
                let value = container
                    .select(&candidate.selector)
                    .find_map(|el| read_value(el, field.kind, candidate, ctx));
                if let Some(value) = value {
                    return FieldValue::Text(value);
                }
            }
        }

        FieldValue::empty()
    }
}

/// Split `css@attr` into selector and attribute.
///
/// Only a trailing plain identifier counts, so `a[href*='@']` is untouched.
fn split_attribute(raw: &str) -> (&str, Option<String>) {
    if let Some((css, attr)) = raw.rsplit_once('@') {
        let is_ident = !attr.is_empty()
            && attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':');
        if is_ident && !css.trim().is_empty() {
            return (css.trim(), Some(attr.to_string()));
        }
    }
    (raw, None)
}

fn read_value(
    element: ElementRef<'_>,
    kind: FieldKind,
    candidate: &Candidate,
    ctx: &PageContext,
) -> Option<String> {
    let value = match (&candidate.attribute, kind) {
        (Some(attr), _) => read_attribute(element, attr, ctx),
        (None, FieldKind::Image) => read_attribute(element, "src", ctx)
            .or_else(|| read_attribute(element, "data-src", ctx)),
        (None, FieldKind::Link) => read_attribute(element, "href", ctx),
        (None, FieldKind::Text) => Some(normalize_text(element)),
    }?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn read_attribute(element: ElementRef<'_>, attr: &str, ctx: &PageContext) -> Option<String> {
    let raw = element.value().attr(attr)?;
    let value = collapse_whitespace(raw);
    if value.is_empty() {
        return None;
    }
    if URL_ATTRIBUTES.contains(&attr) {
        Some(resolve_url(ctx.base_url.as_ref(), &value))
    } else {
        Some(value)
    }
}

/// Resolve `value` against `base`, leaving it as-is when that fails.
pub fn resolve_url(base: Option<&Url>, value: &str) -> String {
    if value.starts_with("data:") || value.starts_with("javascript:") {
        return value.to_string();
    }
    match base {
        Some(base) => base
            .join(value)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| value.to_string()),
        None => value.to_string(),
    }
}

/// Element text with whitespace runs collapsed and ends trimmed.
pub fn normalize_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
