//! Error types for the scan pipeline.
//!
//! Two families:
//! - [`ScanError`] aborts the whole run (caller or configuration mistakes).
//! - [`FetchError`] is scoped to one session; the fetcher records it in the
//!   fetch summary and carries on with the remaining sessions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for pipeline operations that can abort a run.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors that abort a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// `end` precedes `start`. Raised before any network activity.
    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    /// A pattern references a column the feature engine did not produce.
    #[error("Pattern '{pattern}' references missing feature column '{column}'")]
    MissingFeature { pattern: String, column: String },

    /// Scan parameters or stage settings failed validation.
    #[error("Invalid scan parameters: {0}")]
    InvalidParameters(#[from] scanner_common::ValidationError),

    /// A pattern definition is structurally unusable.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl ScanError {
    /// Check if this error was caused by the caller's request rather than configuration.
    pub const fn is_request_error(&self) -> bool {
        matches!(self, Self::InvalidDateRange { .. })
    }
}

/// Non-fatal conditions reported alongside scan results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanWarning {
    /// A symbol has too few rows for some rolling windows; those columns
    /// stay missing for it while the symbol remains in the run.
    InsufficientHistory {
        symbol: String,
        rows: usize,
        features: Vec<String>,
    },
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientHistory {
                symbol,
                rows,
                features,
            } => write!(
                f,
                "{} has {} rows, not enough for {}",
                symbol,
                rows,
                features.join(", ")
            ),
        }
    }
}

/// Errors for a single grouped-bars request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure, timeout, rate limit or 5xx. Worth retrying.
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// 4xx response or malformed payload. Retrying will not help.
    #[error("Permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Check if the error is worth retrying.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status code that is not a success.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(body, 200))
        };

        if status == 429 || status == 408 || status >= 500 {
            Self::Transient(msg)
        } else {
            Self::Permanent(msg)
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
