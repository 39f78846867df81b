//! Built-in pattern library.
//!
//! Each pattern is an expression tree over the default feature columns with
//! thresholds taken from [`ScanParameters`]. Trigger anchoring (whether a
//! setup must occur on the prior session or on either of the prior two) is
//! a [`TriggerAnchor`] argument, expressed with `lag` and `any`.

use super::expr::{all, any, col, Predicate};
use super::matcher::{Pattern, PatternSet};
use crate::params::ScanParameters;

/// Sessions before the decision session in which a trigger may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAnchor {
    /// D-1 only
    PriorSession,
    /// D-1 or D-2
    PriorTwoSessions,
}

impl TriggerAnchor {
    fn lags(self) -> &'static [usize] {
        match self {
            Self::PriorSession => &[1],
            Self::PriorTwoSessions => &[1, 2],
        }
    }

    /// `trigger` held on at least one anchored prior session.
    fn anchored(self, trigger: impl Fn(usize) -> Predicate) -> Predicate {
        any(self.lags().iter().map(|lag| trigger(*lag)))
    }
}

/// Literal `close > open`.
pub fn close_above_open() -> Pattern {
    Pattern::new("close_above_open", col("close").gt(col("open")))
}

/// Gap up of at least `gap_div_atr_min` ATRs on expanding volume with a
/// rising EMA9, closing green.
pub fn gap_up_momentum(params: &ScanParameters) -> Pattern {
    Pattern::new(
        "gap_up_momentum",
        all([
            col("gap_atr").ge(params.gap_div_atr_min),
            col("volume").ge(col("vol_avg") * params.vol_mult),
            col("close").gt(col("open")),
            col("ema9_slope5d").ge(params.slope5d_min),
        ]),
    )
}

/// Intraday push of at least `atr_mult` ATRs that leaves the high stretched
/// above EMA9.
pub fn parabolic_extension(params: &ScanParameters) -> Pattern {
    Pattern::new(
        "parabolic_extension",
        all([
            col("high_chg_atr").ge(params.atr_mult),
            ((col("high") - col("ema9")) / col("atr")).ge(params.ema9_ext_atr_min),
            col("ema9_slope5d").ge(params.slope5d_min),
            col("volume").ge(col("vol_avg") * params.vol_mult),
        ]),
    )
}

/// Red session opening above the prior close after an extended push on an
/// anchored prior session.
pub fn backside_fade(params: &ScanParameters, anchor: TriggerAnchor) -> Pattern {
    let atr_mult = params.atr_mult;
    let ext_min = params.ema9_ext_atr_min;

    Pattern::new(
        "backside_fade",
        all([
            anchor.anchored(|lag| {
                all([
                    col("high_chg_atr").lag(lag).ge(atr_mult),
                    ((col("high") - col("ema9")) / col("atr"))
                        .lag(lag)
                        .ge(ext_min),
                ])
            }),
            col("open").gt(col("prev_close")),
            col("close").lt(col("open")),
        ]),
    )
}

/// Every built-in pattern, with backside triggers anchored on D-1 or D-2.
pub fn library(params: &ScanParameters) -> PatternSet {
    PatternSet::new(vec![
        gap_up_momentum(params),
        parabolic_extension(params),
        backside_fade(params, TriggerAnchor::PriorTwoSessions),
        close_above_open(),
    ])
}

/// Look up one built-in pattern by name.
pub fn by_name(name: &str, params: &ScanParameters) -> Option<Pattern> {
    match name {
        "close_above_open" => Some(close_above_open()),
        "gap_up_momentum" => Some(gap_up_momentum(params)),
        "parabolic_extension" => Some(parabolic_extension(params)),
        "backside_fade" => Some(backside_fade(params, TriggerAnchor::PriorTwoSessions)),
        "backside_fade_d1" => Some(Pattern {
            name: "backside_fade_d1".to_string(),
            ..backside_fade(params, TriggerAnchor::PriorSession)
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureEngine;

    #[test]
    fn test_library_valid_against_default_features() {
        let library = library(&ScanParameters::default());
        let columns = FeatureEngine::default().column_names();

        assert!(library.validate().is_ok());
        assert!(library
            .check_columns(|c| columns.iter().any(|n| n == c))
            .is_ok());
    }

    #[test]
    fn test_thresholds_flow_from_params() {
        let params = ScanParameters {
            gap_div_atr_min: 1.75,
            ..ScanParameters::default()
        };
        let json = serde_json::to_string(&gap_up_momentum(&params)).unwrap();
        assert!(json.contains("1.75"));
    }

    #[test]
    fn test_anchor_lags() {
        let params = ScanParameters::default();
        let d1 = backside_fade(&params, TriggerAnchor::PriorSession);
        let d2 = backside_fade(&params, TriggerAnchor::PriorTwoSessions);

        let d1_json = serde_json::to_string(&d1.predicate).unwrap();
        let d2_json = serde_json::to_string(&d2.predicate).unwrap();
        assert!(!d1_json.contains("\"periods\":2"));
        assert!(d2_json.contains("\"periods\":2"));
    }

    #[test]
    fn test_by_name() {
        let params = ScanParameters::default();
        assert_eq!(by_name("backside_fade_d1", &params).unwrap().name, "backside_fade_d1");
        assert!(by_name("unknown", &params).is_none());
    }
}
