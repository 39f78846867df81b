//! Configuration management for the market scanner.
//!
//! The scanner reads a single configuration file at `~/.scanner/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (SCANNER_* prefix, plus `POLYGON_API_KEY`)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `SCANNER_LOG_LEVEL` → observability.log_level
//! - `SCANNER_LOG_FORMAT` → observability.log_format
//! - `POLYGON_API_KEY` → provider.api_key
//! - `SCANNER_PROVIDER_BASE_URL` → provider.base_url
//! - `SCANNER_FETCH_WORKERS` → fetch.workers

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".scanner"),
        |dirs| dirs.home_dir().join(".scanner"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Where [`Config::load`] takes its values from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// An existing config file
    File(PathBuf),
    /// No file; built-in defaults
    Defaults,
}

impl ConfigSource {
    /// Source for the default config path.
    pub fn locate() -> Self {
        Self::at(&config_path())
    }

    /// Source for a specific config path.
    pub fn at(path: &Path) -> Self {
        if path.is_file() {
            Self::File(path.to_path_buf())
        } else {
            Self::Defaults
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure for the scanner.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Market data provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Grouped fetch worker pool settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Exchange calendar settings
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Output settings for the CLI
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// Missing file means defaults. Nothing is logged here because this runs
    /// before logging is initialized; callers report [`ConfigSource::locate`]
    /// once the subscriber is up.
    pub fn load() -> Result<Self> {
        match ConfigSource::locate() {
            ConfigSource::File(path) => Self::load_from(&path),
            ConfigSource::Defaults => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SCANNER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("SCANNER_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(key) = std::env::var("POLYGON_API_KEY") {
            if !key.is_empty() {
                self.provider.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("SCANNER_PROVIDER_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Ok(workers) = std::env::var("SCANNER_FETCH_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.fetch.workers = n;
            }
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create config directory {}", dir.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Get the provider API key, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        self.provider
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    ///
    /// Built-in noisy modules (hyper, reqwest, h2, rustls) are always filtered.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Market Data Provider
// ============================================================================

/// Grouped daily bars provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name (currently only "polygon")
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// REST API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; `POLYGON_API_KEY` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request split/dividend adjusted bars
    #[serde(default = "default_true")]
    pub adjusted: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Proactive rate limit (requests per minute); `None` disables throttling
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            adjusted: true,
            request_timeout_secs: default_request_timeout_secs(),
            rate_limit_rpm: None,
        }
    }
}

fn default_provider_name() -> String {
    "polygon".into()
}

fn default_base_url() -> String {
    "https://api.polygon.io".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Fetch Worker Pool
// ============================================================================

/// Worker pool and retry policy for per-session fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Concurrent session fetches
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Retries after the first attempt, transient failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds; doubles per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_workers() -> usize {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

// ============================================================================
// Calendar
// ============================================================================

/// Exchange calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Calendar days of history fetched before the scan start date
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Additional full-day closures not covered by the holiday rules
    #[serde(default)]
    pub extra_closures: Vec<NaiveDate>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            extra_closures: Vec::new(),
        }
    }
}

fn default_lookback_days() -> u32 {
    // Enough for a 200-span EMA to warm up
    400
}

// ============================================================================
// Output
// ============================================================================

/// Where and how the CLI writes scan results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for result files (supports `~`)
    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    /// Default output format ("csv" or "json")
    #[serde(default = "default_report_format")]
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_dir: default_report_dir(),
            format: default_report_format(),
        }
    }
}

impl OutputConfig {
    /// Report directory with `~` and environment variables expanded.
    pub fn resolved_report_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.report_dir).map_or_else(
            |_| self.report_dir.clone(),
            |expanded| expanded.into_owned(),
        ))
    }
}

fn default_report_dir() -> String {
    "~/.scanner/reports".into()
}

fn default_report_format() -> String {
    "csv".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Tests
// ============================================================================
