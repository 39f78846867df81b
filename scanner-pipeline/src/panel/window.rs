//! Grouped window kernels.
//!
//! Each kernel runs once per [`SymbolGroup`] over its ascending rows and
//! only reads the current row and earlier rows of the same group. A window
//! that is not yet full, or that contains a missing input, yields `None`.

use std::collections::VecDeque;

use super::{Column, SymbolGroup};

/// Value `periods` rows earlier within the group.
pub fn shift(groups: &[SymbolGroup], values: &[Option<f64>], periods: usize) -> Column {
    let mut out = vec![None; values.len()];
    for group in groups {
        for row in group.rows().skip(periods) {
            out[row] = values[row - periods];
        }
    }
    out
}

/// Mean of the trailing `window` values, current row included.
pub fn rolling_mean(groups: &[SymbolGroup], values: &[Option<f64>], window: usize) -> Column {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }

    for group in groups {
        let mut sum = 0.0;
        let mut missing = 0usize;

        for (i, row) in group.rows().enumerate() {
            match values[row] {
                Some(v) => sum += v,
                None => missing += 1,
            }
            if i >= window {
                match values[row - window] {
                    Some(v) => sum -= v,
                    None => missing -= 1,
                }
            }
            if i + 1 >= window && missing == 0 {
                out[row] = Some(sum / window as f64);
            }
        }
    }
    out
}

/// Maximum of the trailing `window` values, current row included.
pub fn rolling_max(groups: &[SymbolGroup], values: &[Option<f64>], window: usize) -> Column {
    rolling_extreme(groups, values, window, |candidate, kept| candidate >= kept)
}

/// Minimum of the trailing `window` values, current row included.
pub fn rolling_min(groups: &[SymbolGroup], values: &[Option<f64>], window: usize) -> Column {
    rolling_extreme(groups, values, window, |candidate, kept| candidate <= kept)
}

/// Monotonic deque scan. `dominates(new, old)` evicts `old` from the back.
fn rolling_extreme(
    groups: &[SymbolGroup],
    values: &[Option<f64>],
    window: usize,
    dominates: impl Fn(f64, f64) -> bool,
) -> Column {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }

    for group in groups {
        let mut deque: VecDeque<(usize, f64)> = VecDeque::new();
        let mut missing = 0usize;

        for (i, row) in group.rows().enumerate() {
            if i >= window && values[row - window].is_none() {
                missing -= 1;
            }
            while deque.front().is_some_and(|(idx, _)| *idx + window <= row) {
                deque.pop_front();
            }

            match values[row] {
                Some(v) => {
                    while deque.back().is_some_and(|(_, kept)| dominates(v, *kept)) {
                        deque.pop_back();
                    }
                    deque.push_back((row, v));
                }
                None => missing += 1,
            }

            if i + 1 >= window && missing == 0 {
                out[row] = deque.front().map(|(_, v)| *v);
            }
        }
    }
    out
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with
/// the first observation and reported once `span` observations are in.
///
/// A missing input leaves the running state untouched and yields `None`.
pub fn ema(groups: &[SymbolGroup], values: &[Option<f64>], span: usize) -> Column {
    let mut out = vec![None; values.len()];
    if span == 0 {
        return out;
    }
    let alpha = 2.0 / (span as f64 + 1.0);

    for group in groups {
        let mut state: Option<f64> = None;
        let mut seen = 0usize;

        for row in group.rows() {
            let Some(v) = values[row] else {
                continue;
            };
            let next = match state {
                Some(prev) => alpha * v + (1.0 - alpha) * prev,
                None => v,
            };
            state = Some(next);
            seen += 1;

            if seen >= span {
                out[row] = Some(next);
            }
        }
    }
    out
}

/// Percentage change versus `periods` rows earlier: `(x / x[-n] - 1) * 100`.
pub fn pct_change(groups: &[SymbolGroup], values: &[Option<f64>], periods: usize) -> Column {
    let prior = shift(groups, values, periods);
    zip_with(values, &prior, |now, then| {
        if then == 0.0 {
            None
        } else {
            Some((now / then - 1.0) * 100.0)
        }
    })
}

/// True range. The first row of a group has no prior close and uses
/// `high - low` alone.
pub fn true_range(
    groups: &[SymbolGroup],
    high: &[Option<f64>],
    low: &[Option<f64>],
    close: &[Option<f64>],
) -> Column {
    let prev_close = shift(groups, close, 1);

    (0..high.len())
        .map(|row| {
            let (h, l) = (high[row]?, low[row]?);
            let range = h - l;
            Some(match prev_close[row] {
                Some(pc) => range.max((h - pc).abs()).max((l - pc).abs()),
                None => range,
            })
        })
        .collect()
}

/// Combine two columns row by row; a missing side or a non-finite result
/// yields `None`.
pub fn zip_with(
    a: &[Option<f64>],
    b: &[Option<f64>],
    f: impl Fn(f64, f64) -> Option<f64>,
) -> Column {
    a.iter()
        .zip(b)
        .map(|(x, y)| f((*x)?, (*y)?).filter(|v| v.is_finite()))
        .collect()
}
