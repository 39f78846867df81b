//! Feature engine.
//!
//! Computes the indicator columns pattern predicates read. Every column is
//! built from grouped window kernels over (symbol, session) ascending rows,
//! so a value at session `d` depends only on rows at or before `d`.
//!
//! Baselines a signal is compared against (`atr`, `vol_avg`) are shifted one
//! session: today's own range or volume never feeds today's baseline.
//!
//! # Columns
//! - Bar fields: `open`, `high`, `low`, `close`, `volume`
//! - `prev_close`, `range`, `dollar_volume`, `gap_pct`
//! - `true_range`, `atr`, `gap_atr`, `high_chg_atr`
//! - `vol_avg`, `rvol`
//! - `ema{span}`, `high_max{n}`, `low_min{n}`, `ema{span}_slope{n}d`

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::ScanWarning;
use crate::panel::{window, Column, Panel};
use crate::params::FeatureConfig;

// ============================================================================
// Feature Panel
// ============================================================================

/// A panel plus named derived columns, one value per panel row.
#[derive(Debug, Clone)]
pub struct FeaturePanel {
    panel: Panel,
    columns: BTreeMap<String, Column>,
}

impl FeaturePanel {
    /// Wrap a panel, exposing only the bar fields as columns.
    pub fn from_panel(panel: Panel) -> Self {
        let volume: Vec<f64> = panel.volume().iter().map(|v| *v as f64).collect();
        let mut columns = BTreeMap::new();
        columns.insert("open".to_string(), Panel::dense(panel.open()));
        columns.insert("high".to_string(), Panel::dense(panel.high()));
        columns.insert("low".to_string(), Panel::dense(panel.low()));
        columns.insert("close".to_string(), Panel::dense(panel.close()));
        columns.insert("volume".to_string(), Panel::dense(&volume));

        Self { panel, columns }
    }

    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Add or replace a column. The column must have one value per row.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) {
        debug_assert_eq!(column.len(), self.panel.len(), "column length mismatch");
        self.columns.insert(name.into(), column);
    }

    fn get(&self, name: &str) -> &[Option<f64>] {
        self.columns.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Feature panel plus the warnings raised while building it.
#[derive(Debug, Clone)]
pub struct FeatureOutput {
    pub features: FeaturePanel,
    pub warnings: Vec<ScanWarning>,
}

// ============================================================================
// Feature Engine
// ============================================================================

/// Builds the indicator set configured by [`FeatureConfig`].
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine {
    config: FeatureConfig,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Names of every column [`compute`](Self::compute) produces.
    ///
    /// Known without data, so patterns can be checked before any fetch.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            "open",
            "high",
            "low",
            "close",
            "volume",
            "prev_close",
            "range",
            "dollar_volume",
            "gap_pct",
            "true_range",
            "atr",
            "gap_atr",
            "high_chg_atr",
            "vol_avg",
            "rvol",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        for (name, _) in self.windowed_columns() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Windowed columns with the rows a symbol needs before the first value.
    fn windowed_columns(&self) -> Vec<(String, usize)> {
        let c = &self.config;
        let mut out = vec![
            ("atr".to_string(), c.atr_window + 1),
            ("vol_avg".to_string(), c.volume_window + 1),
        ];
        out.extend(c.ema_spans.iter().map(|s| (format!("ema{}", s), *s)));
        for n in &c.extrema_windows {
            out.push((format!("high_max{}", n), *n));
            out.push((format!("low_min{}", n), *n));
        }
        out.extend(c.slopes.iter().map(|s| (s.column(), s.ema_span + s.periods)));
        out
    }

    /// Compute every configured column.
    ///
    /// Rows are neither added nor removed. A symbol with fewer rows than a
    /// window needs keeps `None` in that column and is reported once in
    /// the warnings.
    pub fn compute(&self, panel: Panel) -> FeatureOutput {
        let mut fp = FeaturePanel::from_panel(panel);
        let c = &self.config;

        let groups = fp.panel.groups().to_vec();
        let open = fp.get("open").to_vec();
        let high = fp.get("high").to_vec();
        let low = fp.get("low").to_vec();
        let close = fp.get("close").to_vec();
        let volume = fp.get("volume").to_vec();

        let prev_close = window::shift(&groups, &close, 1);
        let range = window::zip_with(&high, &low, |h, l| Some(h - l));
        let dollar_volume = window::zip_with(&close, &volume, |px, v| Some(px * v));
        let gap_pct = window::zip_with(&open, &prev_close, |o, pc| {
            (pc != 0.0).then(|| (o / pc - 1.0) * 100.0)
        });

        // Volatility baseline, shifted so a row never sees its own range
        let true_range = window::true_range(&groups, &high, &low, &close);
        let atr = window::shift(
            &groups,
            &window::rolling_mean(&groups, &true_range, c.atr_window),
            1,
        );
        let per_atr = |num: &Column| window::zip_with(num, &atr, |n, a| (a > 0.0).then(|| n / a));
        let gap = window::zip_with(&open, &prev_close, |o, pc| Some(o - pc));
        let high_chg = window::zip_with(&high, &open, |h, o| Some(h - o));
        let gap_atr = per_atr(&gap);
        let high_chg_atr = per_atr(&high_chg);

        let vol_avg = window::shift(
            &groups,
            &window::rolling_mean(&groups, &volume, c.volume_window),
            1,
        );
        let rvol = window::zip_with(&volume, &vol_avg, |v, a| (a > 0.0).then(|| v / a));

        fp.insert("prev_close", prev_close);
        fp.insert("range", range);
        fp.insert("dollar_volume", dollar_volume);
        fp.insert("gap_pct", gap_pct);
        fp.insert("true_range", true_range);
        fp.insert("gap_atr", gap_atr);
        fp.insert("high_chg_atr", high_chg_atr);
        fp.insert("atr", atr);
        fp.insert("vol_avg", vol_avg);
        fp.insert("rvol", rvol);

        for span in &c.ema_spans {
            fp.insert(format!("ema{}", span), window::ema(&groups, &close, *span));
        }
        for n in &c.extrema_windows {
            fp.insert(format!("high_max{}", n), window::rolling_max(&groups, &high, *n));
            fp.insert(format!("low_min{}", n), window::rolling_min(&groups, &low, *n));
        }
        for slope in &c.slopes {
            let ema = fp.get(&format!("ema{}", slope.ema_span)).to_vec();
            let column = if ema.is_empty() {
                vec![None; fp.panel.len()]
            } else {
                window::pct_change(&groups, &ema, slope.periods)
            };
            fp.insert(slope.column(), column);
        }

        let warnings = self.history_warnings(&fp);
        info!(
            rows = fp.panel.len(),
            symbols = fp.panel.symbol_count(),
            columns = fp.columns.len(),
            warnings = warnings.len(),
            "Features computed"
        );

        FeatureOutput {
            features: fp,
            warnings,
        }
    }

    fn history_warnings(&self, fp: &FeaturePanel) -> Vec<ScanWarning> {
        let windowed = self.windowed_columns();

        fp.panel
            .groups()
            .iter()
            .filter_map(|group| {
                let features: Vec<String> = windowed
                    .iter()
                    .filter(|(_, required)| group.len() < *required)
                    .map(|(name, _)| name.clone())
                    .collect();
                if features.is_empty() {
                    return None;
                }
                debug!(
                    symbol = %group.symbol,
                    rows = group.len(),
                    missing = features.len(),
                    "Insufficient history for some features"
                );
                Some(ScanWarning::InsufficientHistory {
                    symbol: group.symbol.clone(),
                    rows: group.len(),
                    features,
                })
            })
            .collect()
    }
}
