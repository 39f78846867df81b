//! Report writers.
//!
//! Serialize signal rows to CSV or the full scan report to JSON. Only the
//! binary writes files; the pipeline itself never touches the filesystem.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::assemble::SignalRow;
use crate::pipeline::ScanReport;

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unsupported output format '{}', expected csv or json", other),
        }
    }
}

/// Flat CSV record; pattern names are comma-joined.
#[derive(Serialize)]
struct CsvRecord<'a> {
    ticker: &'a str,
    date: String,
    close: f64,
    volume: u64,
    matched_patterns: String,
}

/// Write signal rows as CSV with a header line.
pub fn write_csv<W: Write>(rows: &[SignalRow], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        csv.write_record(["ticker", "date", "close", "volume", "matched_patterns"])?;
    }
    for row in rows {
        csv.serialize(CsvRecord {
            ticker: &row.ticker,
            date: row.date.format("%Y-%m-%d").to_string(),
            close: row.close,
            volume: row.volume,
            matched_patterns: row.patterns_label(),
        })?;
    }
    csv.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Write the whole report as pretty JSON.
pub fn write_json<W: Write>(report: &ScanReport, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, report).context("Failed to serialize report")?;
    Ok(())
}

/// Default file name for a report, e.g. `scan_20240105_180000.csv`.
pub fn file_name(report: &ScanReport, format: OutputFormat) -> String {
    format!("{}.{}", report.id, format.extension())
}

/// Write a report to `path`, creating parent directories.
pub fn write_report(report: &ScanReport, path: &Path, format: OutputFormat) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        OutputFormat::Csv => write_csv(&report.signals, &mut writer)?,
        OutputFormat::Json => write_json(report, &mut writer)?,
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

    Ok(path.to_path_buf())
}
