//! Configuration validation for the scanner.
//!
//! Values are validated once, when a run is assembled, so stages can read
//! them without re-checking.

use thiserror::Error;

use crate::config::{
    CalendarConfig, Config, FetchConfig, ObservabilityConfig, OutputConfig, ProviderConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Shorthand for an `InvalidValue` error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Collapse a list of errors into a single result.
    pub fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let errors: Vec<ValidationError> = [
            self.observability.validate(),
            self.provider.validate(),
            self.fetch.validate(),
            self.calendar.validate(),
            self.output.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        ValidationError::collect(errors)
    }
}

impl Config {
    /// Load, apply environment overrides and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let levels = ["trace", "debug", "info", "warn", "error"];
        if !levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "observability.log_level",
                format!("must be one of {:?}", levels),
            ));
        }

        Ok(())
    }
}

impl Validate for ProviderConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "provider.base_url".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::invalid(
                "provider.request_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.rate_limit_rpm == Some(0) {
            return Err(ValidationError::invalid(
                "provider.rate_limit_rpm",
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }
}

impl Validate for FetchConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.workers == 0 {
            return Err(ValidationError::invalid("fetch.workers", "must be at least 1"));
        }
        if self.max_retries > 10 {
            return Err(ValidationError::invalid(
                "fetch.max_retries",
                "must be at most 10",
            ));
        }

        Ok(())
    }
}

impl Validate for CalendarConfig {
    fn validate(&self) -> ValidationResult<()> {
        // Roughly ten years; anything longer is almost certainly a typo.
        if self.lookback_days > 3660 {
            return Err(ValidationError::invalid(
                "calendar.lookback_days",
                "must be at most 3660",
            ));
        }

        Ok(())
    }
}

impl Validate for OutputConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.format.as_str() {
            "csv" | "json" => Ok(()),
            other => Err(ValidationError::invalid(
                "output.format",
                format!("unsupported format '{}', expected csv or json", other),
            )),
        }
    }
}
