//! Writing scrape results to JSON or CSV files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::info;

use crate::config::{OutputFormat, Settings};
use crate::models::{Record, ScrapeResult, METADATA_COLUMNS};

/// Default output file stem: `scraped_data_YYYYmmdd_HHMMSS`.
pub fn default_file_stem() -> String {
    format!("scraped_data_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Path the result would be written to.
pub fn output_path(dir: &Path, name: Option<&str>, format: OutputFormat) -> PathBuf {
    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(default_file_stem);
    let mut path = dir.join(name);
    if path.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
        let file_name = format!(
            "{}.{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("scraped_data"),
            format.extension()
        );
        path.set_file_name(file_name);
    }
    path
}

/// Write the records of `result` into `settings.output_dir`.
pub fn save(result: &ScrapeResult, settings: &Settings, name: Option<&str>) -> Result<PathBuf> {
    save_as(result, &settings.output_dir, settings.output_format, name)
}

/// Write the records of `result` into `dir` in the given format.
pub fn save_as(
    result: &ScrapeResult,
    dir: &Path,
    format: OutputFormat,
    name: Option<&str>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let path = output_path(dir, name, format);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        OutputFormat::Json => write_json(&mut writer, &result.records)?,
        OutputFormat::Csv => write_csv(&mut writer, &result.fields, &result.records)?,
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Saved {} records to {}", result.records.len(), path.display());
    Ok(path)
}

/// JSON array of records, pretty printed.
pub fn write_json<W: Write>(writer: W, records: &[Record]) -> Result<()> {
    serde_json::to_writer_pretty(writer, records).context("Failed to serialize records")?;
    Ok(())
}

/// CSV with the configured fields followed by the metadata columns.
/// Multi-valued fields are joined with `; `.
pub fn write_csv<W: Write>(writer: W, fields: &[String], records: &[Record]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    let header: Vec<&str> = fields
        .iter()
        .map(|f| f.as_str())
        .chain(METADATA_COLUMNS.iter().copied())
        .collect();
    csv.write_record(&header).context("Failed to write CSV header")?;

    for record in records {
        let mut row: Vec<String> = fields
            .iter()
            .map(|f| record.get(f).map(|v| v.to_flat_string()).unwrap_or_default())
            .collect();
        row.push(record.page_number.to_string());
        row.push(record.scraped_at_string());
        row.push(record.source_url.clone());
        csv.write_record(&row).context("Failed to write CSV row")?;
    }

    csv.flush().context("Failed to flush CSV output")?;
    Ok(())
}
