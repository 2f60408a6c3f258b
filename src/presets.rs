//! Built-in site configurations.

use crate::scrapers::{FieldSpec, ScrapeRequest, ScraperType};

/// Record limit used by `example` runs unless overridden.
pub const DEFAULT_PRESET_MAX_PRODUCTS: usize = 50;

/// A ready-made scrape configuration for a known site.
#[derive(Debug, Clone)]
pub struct SitePreset {
    pub name: &'static str,
    pub description: &'static str,
    pub url: &'static str,
    pub product_selector: &'static str,
    pub fields: Vec<FieldSpec>,
    pub scraper_type: ScraperType,
}

impl SitePreset {
    /// Build a request for this preset.
    pub fn to_request(&self, max_products: Option<usize>) -> ScrapeRequest {
        ScrapeRequest {
            target_url: self.url.to_string(),
            product_selector: self.product_selector.to_string(),
            fields: self.fields.clone(),
            scraper_type: self.scraper_type,
            max_products,
        }
    }
}

/// All built-in presets.
pub fn all() -> Vec<SitePreset> {
    vec![
        SitePreset {
            name: "books_toscrape",
            description: "Book catalogue practice site (static HTML)",
            url: "http://books.toscrape.com/",
            product_selector: "article.product_pod",
            fields: vec![
                FieldSpec::new("title", &["h3 a@title", "h3 a"]),
                FieldSpec::new("price", &["p.price_color"]),
                FieldSpec::new("availability", &["p.instock.availability"]),
                FieldSpec::new("rating", &[".star-rating@class"]),
                FieldSpec::new("image", &[".image_container img"]),
                FieldSpec::new("link", &["h3 a"]),
            ],
            scraper_type: ScraperType::Static,
        },
        SitePreset {
            name: "quotes_toscrape",
            description: "Quotes practice site (static HTML)",
            url: "http://quotes.toscrape.com/",
            product_selector: ".quote",
            fields: vec![
                FieldSpec::new("text", &[".text"]),
                FieldSpec::new("author", &[".author"]),
                FieldSpec::new("tags", &[".tags a"]).multiple(),
            ],
            scraper_type: ScraperType::Static,
        },
        SitePreset {
            name: "spa_example",
            description: "Placeholder JavaScript storefront (browser)",
            url: "https://example-spa-site.com/products",
            product_selector: ".product-card",
            fields: vec![
                FieldSpec::new("name", &[".product-name"]),
                FieldSpec::new("price", &[".price"]),
                FieldSpec::new("description", &[".description"]),
                FieldSpec::new("image", &[".product-image img"]),
                FieldSpec::new("brand", &[".brand"]),
            ],
            scraper_type: ScraperType::Browser,
        },
    ]
}

/// Look up a preset by name.
pub fn find(name: &str) -> Option<SitePreset> {
    let name = name.trim();
    all().into_iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Fields used by `custom` when none are given.
pub fn default_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("title", &["h1", "h2", "h3", ".title", ".name"]),
        FieldSpec::new("price", &[".price", ".cost", ".amount"]),
        FieldSpec::new("description", &[".description", ".desc", "p"]),
    ]
}
