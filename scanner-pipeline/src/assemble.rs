//! Result assembler.
//!
//! Turns signal matches into the final ordered rows. Ordering is a function
//! of content only: rows are keyed by (date, ticker), so shuffling the input
//! never changes the output. Nothing is filtered here.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::pattern::SignalMatch;

/// One output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: f64,
    pub volume: u64,
    /// Matched pattern names, sorted
    pub matched_patterns: Vec<String>,
}

impl SignalRow {
    /// Pattern names joined with commas, for flat formats.
    pub fn patterns_label(&self) -> String {
        self.matched_patterns.join(",")
    }
}

/// Sorts and packages matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAssembler;

impl ResultAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Produce rows ordered by (date asc, ticker asc).
    ///
    /// Matches sharing a (date, ticker) collapse into one row with the union
    /// of their pattern names.
    pub fn assemble<'a>(
        &self,
        matches: impl IntoIterator<Item = &'a SignalMatch>,
    ) -> Vec<SignalRow> {
        let mut rows: BTreeMap<(NaiveDate, &str), SignalRow> = BTreeMap::new();

        for m in matches {
            let row = rows
                .entry((m.session(), m.symbol()))
                .or_insert_with(|| SignalRow {
                    ticker: m.symbol().to_string(),
                    date: m.session(),
                    close: m.close(),
                    volume: m.volume(),
                    matched_patterns: Vec::new(),
                });
            row.matched_patterns.extend(m.patterns().iter().cloned());
        }

        rows.into_values()
            .map(|mut row| {
                row.matched_patterns.sort();
                row.matched_patterns.dedup();
                row
            })
            .collect()
    }
}
