//! Columnar bar panel.
//!
//! Rows are sorted by (symbol, session) and each symbol occupies one
//! contiguous row range ([`SymbolGroup`]). Every window kernel in
//! [`window`] walks those ranges independently, so a value for one symbol
//! can never read another symbol's rows.

pub mod window;

use std::ops::Range;

use chrono::NaiveDate;

use crate::data::Bar;

/// A derived column. `None` marks a value that could not be computed.
pub type Column = Vec<Option<f64>>;

/// Inclusive session range whose rows may produce signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl OutputWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Check if a session falls inside the window.
    pub fn contains(&self, session: NaiveDate) -> bool {
        session >= self.start && session <= self.end
    }
}

/// Contiguous rows belonging to one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolGroup {
    pub symbol: String,
    pub start: usize,
    pub end: usize,
}

impl SymbolGroup {
    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Long-format OHLCV panel stored column-wise.
#[derive(Debug, Clone, Default)]
pub struct Panel {
    groups: Vec<SymbolGroup>,
    sessions: Vec<NaiveDate>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<u64>,
    /// Rows allowed to produce signals (cleared by the pre-filter)
    eligible: Vec<bool>,
}

impl Panel {
    /// Build a panel from bars.
    ///
    /// Bars are sorted by (symbol, session); a repeated (symbol, session)
    /// keeps its first occurrence.
    pub fn from_bars(mut bars: Vec<Bar>) -> Self {
        bars.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.session.cmp(&b.session)));
        bars.dedup_by(|later, earlier| {
            later.symbol == earlier.symbol && later.session == earlier.session
        });

        let mut panel = Self::with_capacity(bars.len());
        for bar in bars {
            panel.push_row(
                &bar.symbol,
                bar.session,
                [bar.open, bar.high, bar.low, bar.close],
                bar.volume,
                true,
            );
        }
        panel
    }

    fn with_capacity(rows: usize) -> Self {
        Self {
            groups: Vec::new(),
            sessions: Vec::with_capacity(rows),
            open: Vec::with_capacity(rows),
            high: Vec::with_capacity(rows),
            low: Vec::with_capacity(rows),
            close: Vec::with_capacity(rows),
            volume: Vec::with_capacity(rows),
            eligible: Vec::with_capacity(rows),
        }
    }

    fn push_row(
        &mut self,
        symbol: &str,
        session: NaiveDate,
        [open, high, low, close]: [f64; 4],
        volume: u64,
        eligible: bool,
    ) {
        let row = self.sessions.len();
        match self.groups.last_mut() {
            Some(group) if group.symbol == symbol => group.end = row + 1,
            _ => self.groups.push(SymbolGroup {
                symbol: symbol.to_string(),
                start: row,
                end: row + 1,
            }),
        }

        self.sessions.push(session);
        self.open.push(open);
        self.high.push(high);
        self.low.push(low);
        self.close.push(close);
        self.volume.push(volume);
        self.eligible.push(eligible);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn symbol_count(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[SymbolGroup] {
        &self.groups
    }

    pub fn sessions(&self) -> &[NaiveDate] {
        &self.sessions
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> &[u64] {
        &self.volume
    }

    pub fn is_eligible(&self, row: usize) -> bool {
        self.eligible.get(row).copied().unwrap_or(false)
    }

    /// Copy the rows for which `keep` returns true into a new panel.
    ///
    /// `keep` receives the row index; eligibility of kept rows comes from
    /// `eligible`, evaluated on the same index.
    pub fn select(
        &self,
        mut keep: impl FnMut(usize) -> bool,
        mut eligible: impl FnMut(usize) -> bool,
    ) -> Self {
        let mut panel = Self::with_capacity(self.len());
        for group in &self.groups {
            for row in group.rows() {
                if keep(row) {
                    panel.push_row(
                        &group.symbol,
                        self.sessions[row],
                        [self.open[row], self.high[row], self.low[row], self.close[row]],
                        self.volume[row],
                        eligible(row),
                    );
                }
            }
        }
        panel
    }

    /// Lift a raw price slice into a column; non-finite values become missing.
    pub(crate) fn dense(values: &[f64]) -> Column {
        values
            .iter()
            .map(|v| if v.is_finite() { Some(*v) } else { None })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bar(symbol: &str, session: NaiveDate, close: f64) -> Bar {
        Bar {
            symbol: symbol.into(),
            session,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10,
        }
    }

    #[test]
    fn test_from_bars_groups_and_sorts() {
        let panel = Panel::from_bars(vec![
            bar("MSFT", day(5), 3.0),
            bar("AAPL", day(5), 2.0),
            bar("AAPL", day(4), 1.0),
        ]);

        assert_eq!(panel.len(), 3);
        assert_eq!(panel.symbol_count(), 2);
        assert_eq!(panel.groups()[0].symbol, "AAPL");
        assert_eq!(panel.groups()[0].rows(), 0..2);
        assert_eq!(panel.groups()[1].rows(), 2..3);
        assert_eq!(panel.close(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let panel = Panel::from_bars(vec![bar("AAPL", day(4), 1.0), bar("AAPL", day(4), 9.0)]);
        assert_eq!(panel.len(), 1);
        assert_eq!(panel.close(), &[1.0]);
    }

    #[test]
    fn test_select_sets_eligibility() {
        let panel = Panel::from_bars(vec![bar("AAPL", day(4), 1.0), bar("AAPL", day(5), 2.0)]);
        let selected = panel.select(|_| true, |row| row == 1);

        assert!(!selected.is_eligible(0));
        assert!(selected.is_eligible(1));
        assert!(!selected.is_eligible(7));
    }

    #[test]
    fn test_columns_follow_row_order() {
        let panel = Panel::from_bars(vec![bar("MSFT", day(4), 3.0), bar("AAPL", day(4), 1.0)]);
        assert_eq!(panel.sessions(), &[day(4), day(4)]);
        assert_eq!(panel.open(), &[1.0, 3.0]);
        assert_eq!(panel.high(), panel.low());
        assert_eq!(panel.volume(), &[10, 10]);
    }

    #[test]
    fn test_output_window_inclusive() {
        let window = OutputWindow::new(day(4), day(6));
        assert!(window.contains(day(4)));
        assert!(window.contains(day(6)));
        assert!(!window.contains(day(7)));
    }
}
