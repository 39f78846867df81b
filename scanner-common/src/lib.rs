//! Scanner Common - Shared configuration, validation and logging for the market scanner.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    CalendarConfig, Config, ConfigSource, FetchConfig, ObservabilityConfig, OutputConfig,
    ProviderConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
