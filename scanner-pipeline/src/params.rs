//! Scan parameters and stage settings.
//!
//! Every threshold and window the stages read lives here as a typed field
//! with a serde default. Values are validated once when a pipeline run is
//! assembled; stages never re-check them.

use std::path::Path;

use anyhow::Context;
use scanner_common::{Validate, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};

use crate::pattern::PatternSet;

// ============================================================================
// Scan Parameters
// ============================================================================

/// Thresholds read by the pre-filter and the pattern library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    // === Pre-filter thresholds (output region only) ===

    /// Minimum close price
    #[serde(default = "default_min_price")]
    pub min_price: f64,

    /// Minimum rolling mean dollar volume (close * volume)
    #[serde(default = "default_min_dollar_volume")]
    pub min_dollar_volume: f64,

    /// Minimum intraday range (high - low), in price units
    #[serde(default)]
    pub min_range: f64,

    /// Minimum session volume
    #[serde(default = "default_min_volume")]
    pub min_volume: u64,

    /// Minimum opening gap versus the prior close (%). Unset disables the check.
    #[serde(default)]
    pub min_gap_pct: Option<f64>,

    // === Pattern thresholds ===

    /// Minimum (high - open) expressed in ATRs
    #[serde(default = "default_atr_mult")]
    pub atr_mult: f64,

    /// Minimum volume relative to its prior average
    #[serde(default = "default_vol_mult")]
    pub vol_mult: f64,

    /// Minimum 5-session EMA9 slope (%)
    #[serde(default = "default_slope5d_min")]
    pub slope5d_min: f64,

    /// Minimum opening gap in ATRs
    #[serde(default = "default_gap_div_atr_min")]
    pub gap_div_atr_min: f64,

    /// Minimum distance of the high above EMA9, in ATRs
    #[serde(default = "default_ema9_ext_atr_min")]
    pub ema9_ext_atr_min: f64,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            min_dollar_volume: default_min_dollar_volume(),
            min_range: 0.0,
            min_volume: default_min_volume(),
            min_gap_pct: None,
            atr_mult: default_atr_mult(),
            vol_mult: default_vol_mult(),
            slope5d_min: default_slope5d_min(),
            gap_div_atr_min: default_gap_div_atr_min(),
            ema9_ext_atr_min: default_ema9_ext_atr_min(),
        }
    }
}

fn default_min_price() -> f64 {
    5.0
}

fn default_min_dollar_volume() -> f64 {
    10_000_000.0
}

fn default_min_volume() -> u64 {
    500_000
}

fn default_atr_mult() -> f64 {
    1.0
}

fn default_vol_mult() -> f64 {
    1.5
}

fn default_slope5d_min() -> f64 {
    3.0
}

fn default_gap_div_atr_min() -> f64 {
    0.5
}

fn default_ema9_ext_atr_min() -> f64 {
    2.0
}

impl Validate for ScanParameters {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let non_negative = [
            ("params.min_price", self.min_price),
            ("params.min_dollar_volume", self.min_dollar_volume),
            ("params.min_range", self.min_range),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::invalid(field, "must be a finite value >= 0"));
            }
        }

        let positive = [
            ("params.atr_mult", self.atr_mult),
            ("params.vol_mult", self.vol_mult),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                errors.push(ValidationError::invalid(field, "must be a finite value > 0"));
            }
        }

        let finite = [
            ("params.slope5d_min", Some(self.slope5d_min)),
            ("params.gap_div_atr_min", Some(self.gap_div_atr_min)),
            ("params.ema9_ext_atr_min", Some(self.ema9_ext_atr_min)),
            ("params.min_gap_pct", self.min_gap_pct),
        ];
        for (field, value) in finite {
            if value.is_some_and(|v| !v.is_finite()) {
                errors.push(ValidationError::invalid(field, "must be finite"));
            }
        }

        ValidationError::collect(errors)
    }
}

// ============================================================================
// Pre-filter Settings
// ============================================================================

/// Windows used by the pre-filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefilterConfig {
    /// Sessions in the rolling dollar volume mean
    #[serde(default = "default_dollar_volume_window")]
    pub dollar_volume_window: usize,

    /// Symbols with fewer rows in total are excluded.
    /// Unset means `dollar_volume_window`.
    #[serde(default)]
    pub min_history_rows: Option<usize>,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            dollar_volume_window: default_dollar_volume_window(),
            min_history_rows: None,
        }
    }
}

impl PrefilterConfig {
    pub fn min_history_rows(&self) -> usize {
        self.min_history_rows.unwrap_or(self.dollar_volume_window)
    }
}

fn default_dollar_volume_window() -> usize {
    20
}

impl Validate for PrefilterConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.dollar_volume_window == 0 {
            return Err(ValidationError::invalid(
                "prefilter.dollar_volume_window",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Feature Settings
// ============================================================================

/// EMA slope: percentage change of `ema{ema_span}` over `periods` sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlopeSpec {
    pub ema_span: usize,
    pub periods: usize,
}

impl SlopeSpec {
    /// Column name, e.g. `ema9_slope5d`.
    pub fn column(&self) -> String {
        format!("ema{}_slope{}d", self.ema_span, self.periods)
    }
}

/// Windows used by the feature engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// ATR window (rolling mean of true range, shifted one session)
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,

    /// Volume average window (shifted one session)
    #[serde(default = "default_volume_window")]
    pub volume_window: usize,

    #[serde(default = "default_ema_spans")]
    pub ema_spans: Vec<usize>,

    /// Rolling max of high / min of low windows
    #[serde(default = "default_extrema_windows")]
    pub extrema_windows: Vec<usize>,

    #[serde(default = "default_slopes")]
    pub slopes: Vec<SlopeSpec>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            atr_window: default_atr_window(),
            volume_window: default_volume_window(),
            ema_spans: default_ema_spans(),
            extrema_windows: default_extrema_windows(),
            slopes: default_slopes(),
        }
    }
}

fn default_atr_window() -> usize {
    14
}

fn default_volume_window() -> usize {
    20
}

fn default_ema_spans() -> Vec<usize> {
    vec![9, 20, 50, 200]
}

fn default_extrema_windows() -> Vec<usize> {
    vec![5, 20, 50]
}

fn default_slopes() -> Vec<SlopeSpec> {
    vec![
        SlopeSpec {
            ema_span: 9,
            periods: 5,
        },
        SlopeSpec {
            ema_span: 20,
            periods: 5,
        },
    ]
}

impl Validate for FeatureConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.atr_window == 0 {
            errors.push(ValidationError::invalid("features.atr_window", "must be at least 1"));
        }
        if self.volume_window == 0 {
            errors.push(ValidationError::invalid(
                "features.volume_window",
                "must be at least 1",
            ));
        }
        if self.ema_spans.contains(&0) {
            errors.push(ValidationError::invalid("features.ema_spans", "spans must be at least 1"));
        }
        if self.extrema_windows.contains(&0) {
            errors.push(ValidationError::invalid(
                "features.extrema_windows",
                "windows must be at least 1",
            ));
        }
        for slope in &self.slopes {
            if slope.periods == 0 {
                errors.push(ValidationError::invalid(
                    "features.slopes",
                    format!("{} has a zero period", slope.column()),
                ));
            }
            if !self.ema_spans.contains(&slope.ema_span) {
                errors.push(ValidationError::invalid(
                    "features.slopes",
                    format!("{} needs ema{} in ema_spans", slope.column(), slope.ema_span),
                ));
            }
        }

        ValidationError::collect(errors)
    }
}

// ============================================================================
// Scan Profile
// ============================================================================

/// Everything a run needs besides the date range, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanProfile {
    #[serde(default)]
    pub params: ScanParameters,

    #[serde(default)]
    pub prefilter: PrefilterConfig,

    #[serde(default)]
    pub features: FeatureConfig,

    /// Pattern set; the built-in library when absent
    #[serde(default)]
    pub patterns: Option<PatternSet>,

    /// Calendar days of history fetched before the start date.
    /// Falls back to the calendar section of the config file.
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

impl ScanProfile {
    /// Load a profile from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        let profile: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse profile: {}", path.display()))?;
        Ok(profile)
    }

    /// Pattern set for this profile.
    pub fn pattern_set(&self) -> PatternSet {
        match &self.patterns {
            Some(patterns) => patterns.clone(),
            None => crate::pattern::builtin::library(&self.params),
        }
    }
}

impl Validate for ScanProfile {
    fn validate(&self) -> ValidationResult<()> {
        let errors: Vec<ValidationError> = [
            self.params.validate(),
            self.prefilter.validate(),
            self.features.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        ValidationError::collect(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ScanParameters::default().validate().is_ok());
        assert!(FeatureConfig::default().validate().is_ok());
        assert!(ScanProfile::default().validate().is_ok());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let params = ScanParameters {
            min_price: -1.0,
            vol_mult: 0.0,
            ..ScanParameters::default()
        };
        match params.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected two errors, got {:?}", other),
        }
    }

    #[test]
    fn test_nan_rejected() {
        let params = ScanParameters {
            slope5d_min: f64::NAN,
            ..ScanParameters::default()
        };
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("slope5d_min"));
    }

    #[test]
    fn test_slope_requires_ema_span() {
        let features = FeatureConfig {
            ema_spans: vec![20],
            ..FeatureConfig::default()
        };
        let err = features.validate().unwrap_err();
        assert!(err.to_string().contains("ema9_slope5d"));
    }

    #[test]
    fn test_min_history_defaults_to_window() {
        let config = PrefilterConfig {
            dollar_volume_window: 30,
            min_history_rows: None,
        };
        assert_eq!(config.min_history_rows(), 30);
    }

    #[test]
    fn test_profile_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"params": {{"atr_mult": 2.5}}, "lookback_days": 120}}"#).unwrap();

        let profile = ScanProfile::load(file.path()).unwrap();
        assert!((profile.params.atr_mult - 2.5).abs() < 1e-12);
        assert!((profile.params.min_price - 5.0).abs() < 1e-12);
        assert_eq!(profile.lookback_days, Some(120));
        assert!(profile.patterns.is_none());
        assert_eq!(profile.features.ema_spans, vec![9, 20, 50, 200]);
    }

    #[test]
    fn test_profile_missing_file() {
        let err = ScanProfile::load(Path::new("/nonexistent/profile.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read profile"));
    }
}
