//! Property tests for the in-memory stages.
//!
//! - Truncating the future never changes a derived value (no look-ahead)
//! - The pre-filter never adds symbols and every survivor has a passing row
//! - Assembled output does not depend on match order

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use proptest::prelude::*;

use scanner_pipeline::assemble::ResultAssembler;
use scanner_pipeline::data::Bar;
use scanner_pipeline::features::FeatureEngine;
use scanner_pipeline::panel::{OutputWindow, Panel};
use scanner_pipeline::params::{FeatureConfig, PrefilterConfig, ScanParameters, SlopeSpec};
use scanner_pipeline::pattern::{builtin, col, Pattern, PatternMatcher, PatternSet};
use scanner_pipeline::prefilter::PreFilter;

// ============================================================================
// Generators
// ============================================================================

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()
}

/// One step of a random walk: (close move, open offset, wick, volume).
type Step = (f64, f64, f64, u64);

fn walk(symbol: &str, steps: &[Step]) -> Vec<Bar> {
    let mut prev_close = 50.0;
    steps
        .iter()
        .enumerate()
        .map(|(i, (close_move, open_offset, wick, volume))| {
            let open = prev_close * (0.95 + 0.1 * open_offset);
            let close = prev_close * (0.9 + 0.2 * close_move);
            prev_close = close;
            Bar {
                symbol: symbol.to_string(),
                session: start() + Days::new(i as u64),
                open,
                high: open.max(close) * (1.0 + 0.05 * wick),
                low: open.min(close) * (1.0 - 0.05 * wick),
                close,
                volume: *volume,
            }
        })
        .collect()
}

fn step() -> impl Strategy<Value = Step> {
    (0.0f64..1.0, 0.0f64..1.0, 0.0f64..1.0, 0u64..2_000_000)
}

/// Up to three symbols with independent histories of 1..=60 rows.
fn bars() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec(prop::collection::vec(step(), 1..=60), 1..=3).prop_map(|series| {
        series
            .iter()
            .enumerate()
            .flat_map(|(i, steps)| walk(&format!("SYM{}", i), steps))
            .collect()
    })
}

fn small_features() -> FeatureConfig {
    FeatureConfig {
        atr_window: 5,
        volume_window: 4,
        ema_spans: vec![3, 8],
        extrema_windows: vec![2, 6],
        slopes: vec![SlopeSpec {
            ema_span: 3,
            periods: 2,
        }],
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn test_no_look_ahead(bars in bars(), cutoff in 0u64..60) {
        let cutoff_day = start() + Days::new(cutoff);
        let engine = FeatureEngine::new(small_features());

        let full = engine.compute(Panel::from_bars(bars.clone())).features;
        let truncated_bars: Vec<Bar> =
            bars.into_iter().filter(|b| b.session <= cutoff_day).collect();
        let truncated = engine.compute(Panel::from_bars(truncated_bars)).features;

        let full_groups: HashMap<&str, usize> = full
            .panel()
            .groups()
            .iter()
            .map(|g| (g.symbol.as_str(), g.start))
            .collect();

        for name in engine.column_names() {
            let full_col = full.column(&name).unwrap();
            let trunc_col = truncated.column(&name).unwrap();

            for group in truncated.panel().groups() {
                let full_start = full_groups[group.symbol.as_str()];
                for (offset, row) in group.rows().enumerate() {
                    prop_assert_eq!(
                        trunc_col[row],
                        full_col[full_start + offset],
                        "column {} differs for {} at offset {}",
                        name,
                        group.symbol,
                        offset
                    );
                }
            }
        }
    }

    #[test]
    fn test_prefilter_monotonic(
        bars in bars(),
        min_price in 0.0f64..80.0,
        min_volume in 0u64..1_500_000,
        window_start in 0u64..60,
        window_len in 0u64..20,
    ) {
        let panel = Panel::from_bars(bars);
        let window = OutputWindow::new(
            start() + Days::new(window_start),
            start() + Days::new(window_start + window_len),
        );
        let params = ScanParameters {
            min_price,
            min_volume,
            min_dollar_volume: 0.0,
            ..ScanParameters::default()
        };
        let config = PrefilterConfig { dollar_volume_window: 3, min_history_rows: None };

        let (reduced, stats) = PreFilter::new(config.clone(), params.clone()).apply(&panel, window);

        prop_assert!(reduced.symbol_count() <= panel.symbol_count());
        prop_assert_eq!(stats.symbols_out, reduced.symbol_count());

        for group in reduced.groups() {
            let passing: Vec<usize> = group.rows().filter(|r| reduced.is_eligible(*r)).collect();
            prop_assert!(!passing.is_empty(), "{} kept without a passing row", group.symbol);
            for row in passing {
                prop_assert!(window.contains(reduced.sessions()[row]));
                prop_assert!(reduced.close()[row] >= min_price);
                prop_assert!(reduced.volume()[row] >= min_volume);
            }
        }

        // Tightening a threshold never lets more symbols through
        let stricter = ScanParameters { min_price: min_price * 1.5 + 1.0, ..params };
        let (tighter, _) = PreFilter::new(config, stricter).apply(&panel, window);
        prop_assert!(tighter.symbol_count() <= reduced.symbol_count());
    }

    #[test]
    fn test_assembly_independent_of_match_order(
        bars in bars(),
        pivot in any::<prop::sample::Index>(),
    ) {
        let panel = Panel::from_bars(bars);
        let engine = FeatureEngine::new(small_features());
        let features = engine.compute(panel).features;

        let patterns = PatternSet::new(vec![
            builtin::close_above_open(),
            Pattern::new("higher_close", col("close").gt(col("close").lag(1))),
        ]);
        let window = OutputWindow::new(start(), start() + Days::new(60));
        let matches = PatternMatcher::new(patterns)
            .unwrap()
            .match_panel(&features, window)
            .unwrap();

        let mut reordered = matches.clone();
        reordered.reverse();
        if !reordered.is_empty() {
            let len = reordered.len();
            reordered.rotate_left(pivot.index(len));
        }

        let assembler = ResultAssembler::new();
        let rows = assembler.assemble(&matches);
        prop_assert_eq!(&rows, &assembler.assemble(&reordered));
        prop_assert_eq!(rows.len(), matches.len());
        prop_assert!(rows.windows(2).all(|w| (w[0].date, &w[0].ticker) < (w[1].date, &w[1].ticker)));
    }
}
