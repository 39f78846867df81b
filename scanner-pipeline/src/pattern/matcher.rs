//! Pattern matcher.
//!
//! Evaluates every pattern of a [`PatternSet`] over the feature panel and
//! emits one [`SignalMatch`] per (symbol, session) in the output window that
//! satisfies at least one pattern. A row matching several patterns yields a
//! single match listing all of their names.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::expr::Predicate;
use crate::error::{Result, ScanError};
use crate::features::FeaturePanel;
use crate::panel::OutputWindow;

// ============================================================================
// Patterns
// ============================================================================

/// A named predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub predicate: Predicate,
}

impl Pattern {
    pub fn new(name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

/// Ordered collection of patterns evaluated together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }

    /// Single-pattern mode.
    pub fn single(name: impl Into<String>, predicate: Predicate) -> Self {
        Self::new(vec![Pattern::new(name, predicate)])
    }

    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name.as_str()).collect()
    }

    /// Keep only the named patterns, in set order.
    pub fn select(&self, names: &[String]) -> Self {
        Self::new(
            self.patterns
                .iter()
                .filter(|p| names.contains(&p.name))
                .cloned()
                .collect(),
        )
    }

    /// Check names and predicate structure.
    pub fn validate(&self) -> Result<()> {
        if self.patterns.is_empty() {
            return Err(ScanError::InvalidPattern {
                pattern: String::new(),
                reason: "pattern set is empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for pattern in &self.patterns {
            if pattern.name.trim().is_empty() {
                return Err(ScanError::InvalidPattern {
                    pattern: pattern.name.clone(),
                    reason: "name is empty".to_string(),
                });
            }
            if !seen.insert(pattern.name.as_str()) {
                return Err(ScanError::InvalidPattern {
                    pattern: pattern.name.clone(),
                    reason: "duplicate name".to_string(),
                });
            }
            pattern
                .predicate
                .check()
                .map_err(|reason| ScanError::InvalidPattern {
                    pattern: pattern.name.clone(),
                    reason,
                })?;
        }

        Ok(())
    }

    /// Fail on the first column a pattern reads that `available` lacks.
    pub fn check_columns(&self, available: impl Fn(&str) -> bool) -> Result<()> {
        for pattern in &self.patterns {
            if let Some(column) = pattern
                .predicate
                .columns()
                .into_iter()
                .find(|c| !available(c))
            {
                return Err(ScanError::MissingFeature {
                    pattern: pattern.name.clone(),
                    column,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Signal Match
// ============================================================================

/// A (symbol, session) that satisfied one or more patterns.
///
/// Only the matcher creates these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalMatch {
    symbol: String,
    session: NaiveDate,
    patterns: Vec<String>,
    close: f64,
    volume: u64,
    /// Values of the columns the matched predicates read, at this row
    values: BTreeMap<String, f64>,
}

impl SignalMatch {
    pub(crate) fn new(
        symbol: String,
        session: NaiveDate,
        patterns: Vec<String>,
        close: f64,
        volume: u64,
        values: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            symbol,
            session,
            patterns,
            close,
            volume,
            values,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn session(&self) -> NaiveDate {
        self.session
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }
}

// ============================================================================
// Pattern Matcher
// ============================================================================

/// Evaluates a validated pattern set.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    patterns: PatternSet,
}

impl PatternMatcher {
    /// Validate the set and build a matcher.
    pub fn new(patterns: PatternSet) -> Result<Self> {
        patterns.validate()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Evaluate every pattern and collect matches inside `window`.
    ///
    /// Rows the pre-filter marked ineligible never match. Output is ordered
    /// by session, then symbol.
    pub fn match_panel(&self, fp: &FeaturePanel, window: OutputWindow) -> Result<Vec<SignalMatch>> {
        self.patterns.check_columns(|c| fp.has_column(c))?;

        let panel = fp.panel();
        let mut masks = Vec::with_capacity(self.patterns.len());
        for pattern in self.patterns.iter() {
            let mask = pattern
                .predicate
                .eval(fp)
                .map_err(|missing| ScanError::MissingFeature {
                    pattern: pattern.name.clone(),
                    column: missing.0,
                })?;
            debug!(
                pattern = %pattern.name,
                rows = mask.iter().filter(|m| **m).count(),
                "Pattern evaluated"
            );
            masks.push((pattern, pattern.predicate.columns(), mask));
        }

        let mut matches = Vec::new();
        for group in panel.groups() {
            for row in group.rows() {
                let session = panel.sessions()[row];
                if !window.contains(session) || !panel.is_eligible(row) {
                    continue;
                }

                let hits: Vec<_> = masks.iter().filter(|(_, _, mask)| mask[row]).collect();
                if hits.is_empty() {
                    continue;
                }

                let columns: BTreeSet<&String> = hits.iter().flat_map(|(_, cols, _)| cols).collect();
                let values = columns
                    .into_iter()
                    .filter_map(|c| Some((c.clone(), fp.column(c)?[row]?)))
                    .collect();

                matches.push(SignalMatch::new(
                    group.symbol.clone(),
                    session,
                    hits.iter().map(|(p, _, _)| p.name.clone()).collect(),
                    panel.close()[row],
                    panel.volume()[row],
                    values,
                ));
            }
        }

        matches.sort_by(|a, b| {
            a.session
                .cmp(&b.session)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        info!(
            patterns = self.patterns.len(),
            matches = matches.len(),
            "Pattern matching complete"
        );
        Ok(matches)
    }
}
