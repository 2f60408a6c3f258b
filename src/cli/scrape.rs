//! Scrape commands.

use std::sync::Arc;

use anyhow::{bail, Context};
use console::style;

use pagetrawl::scrapers::ConfigError;
use pagetrawl::{export, presets, FieldSpec, ScrapeRequest, ScrapeResult, Scraper, ScraperType, Settings};

/// Arguments of the `custom` command.
pub struct CustomArgs {
    pub url: String,
    pub product_selector: String,
    pub fields: Vec<String>,
    pub multi: Vec<String>,
    pub scraper_type: ScraperType,
    pub max_products: Option<usize>,
    pub output: Option<String>,
}

/// Parse `--field` values, falling back to the default field set.
fn parse_fields(raw: &[String], multi: &[String]) -> Result<Vec<FieldSpec>, ConfigError> {
    let mut fields = if raw.is_empty() {
        presets::default_fields()
    } else {
        raw.iter()
            .map(|f| FieldSpec::parse(f))
            .collect::<Result<Vec<_>, _>>()?
    };
    for field in &mut fields {
        if multi.iter().any(|m| m == &field.name) {
            field.multiple = true;
        }
    }
    Ok(fields)
}

pub async fn cmd_custom(settings: Settings, args: CustomArgs) -> anyhow::Result<()> {
    let fields = parse_fields(&args.fields, &args.multi)?;
    let request = ScrapeRequest {
        target_url: args.url,
        product_selector: args.product_selector,
        fields,
        scraper_type: args.scraper_type,
        max_products: args.max_products,
    };
    run_scrape(settings, request, args.output.as_deref()).await
}

pub fn cmd_list_presets() {
    println!("{}", style("Available presets:").bold());
    for preset in presets::all() {
        println!(
            "  {} {:<16} {} [{}]",
            style("→").cyan(),
            preset.name,
            preset.description,
            preset.scraper_type
        );
        println!("    {}", style(preset.url).dim());
    }
}

pub async fn cmd_example(
    settings: Settings,
    site: Option<&str>,
    max_products: Option<usize>,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let Some(site) = site else {
        cmd_list_presets();
        bail!("No preset given. Pick one of the presets above.");
    };
    let preset = presets::find(site)
        .with_context(|| format!("Unknown preset '{}'. Use --list to see presets.", site))?;
    let request =
        preset.to_request(Some(max_products.unwrap_or(presets::DEFAULT_PRESET_MAX_PRODUCTS)));
    run_scrape(settings, request, output.or(Some(preset.name))).await
}

async fn run_scrape(
    settings: Settings,
    request: ScrapeRequest,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let settings = Arc::new(settings);
    println!(
        "{} Scraping {} ({})",
        style("→").cyan(),
        request.target_url,
        request.scraper_type
    );

    let mut scraper = Scraper::new(request, settings.clone())?;

    let token = scraper.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Interrupted, finishing up...", style("!").yellow());
            token.cancel();
        }
    });

    let result = scraper.scrape().await;
    print_summary(&result);

    if result.records.is_empty() {
        println!("{} No records to save", style("!").yellow());
    } else {
        let path = export::save(&result, &settings, output)?;
        println!(
            "{} Saved {} records to {}",
            style("✓").green(),
            result.records.len(),
            path.display()
        );
    }

    if let Some(reason) = result.error() {
        bail!("Scrape aborted: {}", reason);
    }
    Ok(())
}

fn print_summary(result: &ScrapeResult) {
    let stats = &result.stats;
    let marker = if result.status.is_done() {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "{} {} records from {} pages in {:.1}s ({} requests, {} retries, {} blocks)",
        marker,
        stats.total_records,
        stats.total_pages,
        stats.elapsed_seconds,
        stats.requests,
        stats.retries,
        stats.blocks
    );

    if !stats.per_field_fill_rate.is_empty() {
        println!("  Field fill rates:");
        for field in &result.fields {
            let rate = stats.per_field_fill_rate.get(field).copied().unwrap_or(0.0);
            println!("    {:<20} {:>5.1}%", field, rate * 100.0);
        }
    }

    for warning in &stats.quality_warnings {
        println!("  {} {}", style("!").yellow(), warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fields_when_none_given() {
        let fields = parse_fields(&[], &[]).unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["title", "price", "description"]);
    }

    #[test]
    fn test_multi_flag_marks_fields() {
        let fields = parse_fields(
            &["tags:.tags a".to_string(), "title:h2".to_string()],
            &["tags".to_string()],
        )
        .unwrap();
        assert!(fields[0].multiple);
        assert!(!fields[1].multiple);
    }

    #[test]
    fn test_malformed_field_rejected() {
        assert!(parse_fields(&["title".to_string()], &[]).is_err());
    }
}
