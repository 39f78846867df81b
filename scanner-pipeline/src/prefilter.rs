//! Pre-filter stage.
//!
//! Shrinks the panel before feature computation using fields that are cheap
//! to derive: prior close, rolling mean dollar volume and intraday range.
//! Only rows inside the output window are tested. History rows are kept
//! untouched because later rolling windows need them.
//!
//! A surviving symbol keeps every row. Output rows that failed the test stay
//! in place as window context but are marked ineligible, so they can never
//! produce a signal and never leave a gap in a later rolling window.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::panel::{window, Column, OutputWindow, Panel};
use crate::params::{PrefilterConfig, ScanParameters};

// ============================================================================
// Pre-filter Statistics
// ============================================================================

/// Funnel counts for one pre-filter pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefilterStats {
    pub symbols_in: usize,
    pub symbols_out: usize,
    pub rows_in: usize,
    pub rows_out: usize,
    /// Output-window rows tested
    pub output_rows: usize,
    /// Output-window rows that passed
    pub output_rows_passed: usize,
    /// Symbols dropped for having too few rows in total
    pub short_history: usize,
}

impl PrefilterStats {
    /// Symbols eliminated (%).
    pub fn elimination_rate(&self) -> f64 {
        if self.symbols_in == 0 {
            return 0.0;
        }
        let eliminated = self.symbols_in.saturating_sub(self.symbols_out);
        (eliminated as f64 / self.symbols_in as f64) * 100.0
    }
}

/// Minimal derived fields used by the predicate.
#[derive(Debug, Clone)]
pub struct PrefilterFields {
    pub prev_close: Column,
    pub dollar_volume_avg: Column,
    pub range: Vec<f64>,
}

impl PrefilterFields {
    pub fn compute(panel: &Panel, dollar_volume_window: usize) -> Self {
        let groups = panel.groups();
        let close = Panel::dense(panel.close());

        let dollar_volume: Column = panel
            .close()
            .iter()
            .zip(panel.volume())
            .map(|(c, v)| Some(c * *v as f64))
            .collect();

        Self {
            prev_close: window::shift(groups, &close, 1),
            dollar_volume_avg: window::rolling_mean(groups, &dollar_volume, dollar_volume_window),
            range: panel
                .high()
                .iter()
                .zip(panel.low())
                .map(|(h, l)| h - l)
                .collect(),
        }
    }
}

// ============================================================================
// Pre-filter
// ============================================================================

/// Cheap output-region filter.
#[derive(Debug, Clone)]
pub struct PreFilter {
    config: PrefilterConfig,
    params: ScanParameters,
}

impl PreFilter {
    pub fn new(config: PrefilterConfig, params: ScanParameters) -> Self {
        Self { config, params }
    }

    /// Check one row against the thresholds.
    fn passes(&self, panel: &Panel, fields: &PrefilterFields, row: usize) -> bool {
        let p = &self.params;
        let close = panel.close()[row];

        if close < p.min_price
            || panel.volume()[row] < p.min_volume
            || fields.range[row] < p.min_range
        {
            return false;
        }
        if !fields.dollar_volume_avg[row].is_some_and(|dv| dv >= p.min_dollar_volume) {
            return false;
        }
        if let Some(min_gap) = p.min_gap_pct {
            let gap = fields.prev_close[row]
                .filter(|pc| *pc > 0.0)
                .map(|pc| (panel.open()[row] / pc - 1.0) * 100.0);
            if !gap.is_some_and(|g| g >= min_gap) {
                return false;
            }
        }

        true
    }

    /// Apply the filter, returning an independent reduced panel.
    pub fn apply(&self, panel: &Panel, output: OutputWindow) -> (Panel, PrefilterStats) {
        let fields = PrefilterFields::compute(panel, self.config.dollar_volume_window);
        let min_rows = self.config.min_history_rows();

        let mut stats = PrefilterStats {
            symbols_in: panel.symbol_count(),
            rows_in: panel.len(),
            ..PrefilterStats::default()
        };
        let mut passed = vec![false; panel.len()];
        let mut survivors = HashSet::new();

        for group in panel.groups() {
            if group.len() < min_rows {
                stats.short_history += 1;
                debug!(
                    symbol = %group.symbol,
                    rows = group.len(),
                    required = min_rows,
                    "Excluding symbol with short history"
                );
                continue;
            }

            for row in group.rows() {
                if !output.contains(panel.sessions()[row]) {
                    continue;
                }
                stats.output_rows += 1;
                if self.passes(panel, &fields, row) {
                    passed[row] = true;
                    stats.output_rows_passed += 1;
                }
            }

            if group.rows().any(|row| passed[row]) {
                survivors.insert(group.symbol.clone());
            }
        }

        let mut keep = vec![false; panel.len()];
        for group in panel.groups().iter().filter(|g| survivors.contains(&g.symbol)) {
            keep[group.rows()].fill(true);
        }
        let reduced = panel.select(|row| keep[row], |row| passed[row]);

        stats.symbols_out = reduced.symbol_count();
        stats.rows_out = reduced.len();

        info!(
            symbols_in = stats.symbols_in,
            symbols_out = stats.symbols_out,
            short_history = stats.short_history,
            rows_out = stats.rows_out,
            "Pre-filter complete ({:.1}% eliminated)",
            stats.elimination_rate()
        );

        (reduced, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Bar;
    use chrono::{Duration, NaiveDate};

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn bars(symbol: &str, closes: &[f64], volume: u64) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                symbol: symbol.into(),
                session: start() + Duration::days(i as i64),
                open: *c,
                high: c + 1.0,
                low: c - 0.5,
                close: *c,
                volume,
            })
            .collect()
    }

    fn filter() -> PreFilter {
        let params = ScanParameters {
            min_price: 5.0,
            min_dollar_volume: 1_000.0,
            min_volume: 100,
            ..ScanParameters::default()
        };
        PreFilter::new(
            PrefilterConfig {
                dollar_volume_window: 3,
                min_history_rows: None,
            },
            params,
        )
    }

    fn last_days(n: i64, total: i64) -> OutputWindow {
        OutputWindow::new(
            start() + Duration::days(total - n),
            start() + Duration::days(total - 1),
        )
    }

    #[test]
    fn test_history_kept_for_survivors() {
        // Cheap in history, expensive in the output window
        let mut closes = vec![1.0; 8];
        closes.extend([10.0, 10.0]);
        let panel = Panel::from_bars(bars("RISE", &closes, 1_000));

        let (reduced, stats) = filter().apply(&panel, last_days(2, 10));

        assert_eq!(reduced.len(), 10);
        assert_eq!(stats.symbols_out, 1);
        assert_eq!(stats.output_rows, 2);
        assert_eq!(stats.output_rows_passed, 2);
        assert!(!reduced.is_eligible(0));
        assert!(reduced.is_eligible(9));
    }

    #[test]
    fn test_symbol_without_passing_output_row_dropped() {
        let mut all = bars("CHEAP", &[1.0; 10], 1_000);
        all.extend(bars("GOOD", &[20.0; 10], 1_000));
        let panel = Panel::from_bars(all);

        let (reduced, stats) = filter().apply(&panel, last_days(3, 10));

        let symbols: Vec<&str> = reduced.groups().iter().map(|g| g.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["GOOD"]);
        assert_eq!(stats.symbols_in, 2);
        assert!((stats.elimination_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_output_row_kept_but_ineligible() {
        let mut closes = vec![20.0; 8];
        closes.extend([2.0, 20.0]);
        let panel = Panel::from_bars(bars("DIP", &closes, 1_000));

        let (reduced, _) = filter().apply(&panel, last_days(2, 10));

        assert_eq!(reduced.len(), 10);
        assert!(!reduced.is_eligible(8));
        assert!(reduced.is_eligible(9));
    }

    #[test]
    fn test_short_history_excluded() {
        let panel = Panel::from_bars(bars("NEW", &[20.0, 20.0], 1_000));
        let (reduced, stats) = filter().apply(&panel, last_days(1, 2));

        assert!(reduced.is_empty());
        assert_eq!(stats.short_history, 1);
    }

    #[test]
    fn test_dollar_volume_uses_window_only() {
        // Dollar volume: 20 * 10 = 200 per row, below the 1000 minimum
        let panel = Panel::from_bars(bars("THIN", &[20.0; 10], 10));
        let (reduced, _) = filter().apply(&panel, last_days(3, 10));
        assert!(reduced.is_empty());
    }

    #[test]
    fn test_min_gap_requires_prior_close() {
        let mut all = bars("FLAT", &[20.0; 5], 1_000);
        all[4].open = 22.0;
        all[4].high = 23.0;
        let panel = Panel::from_bars(all);

        let mut f = filter();
        f.params.min_gap_pct = Some(5.0);
        let (reduced, stats) = f.apply(&panel, last_days(2, 5));

        assert_eq!(stats.output_rows_passed, 1);
        assert!(reduced.is_eligible(4));
        assert!(!reduced.is_eligible(3));
    }
}
