//! Market data module.
//!
//! Provides the grouped daily bars boundary: the record type every provider
//! returns, the provider trait, the Polygon adapter, and the session fetcher
//! that fans requests out over a bounded worker pool.
//!
//! # Data Sources
//! - **Polygon** grouped daily aggregates: one request returns every US stock
//!   for one date.

mod fetcher;
mod polygon;
mod provider;
mod rate_limiter;

pub use fetcher::{FailedSession, FetchOutcome, FetchSummary, FetcherConfig, GroupedBarFetcher};
pub use polygon::PolygonAdapter;
pub use provider::GroupedBarsProvider;
pub use rate_limiter::{RateLimiter, SharedRateLimiter};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Data Types
// ============================================================================

/// One symbol's daily OHLCV observation for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Exchange ticker
    pub symbol: String,
    /// Trading session
    pub session: NaiveDate,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Share volume
    pub volume: u64,
}

impl Bar {
    /// Check the OHLC ordering invariant and that prices are positive and finite.
    ///
    /// `high >= max(open, close) >= min(open, close) >= low > 0`
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        if self.symbol.is_empty() {
            return false;
        }

        self.high >= self.open.max(self.close) && self.open.min(self.close) >= self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            session: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn test_valid_bar() {
        let b = bar(10.0, 11.0, 9.5, 10.5);
        assert!(b.is_valid());
    }

    #[test]
    fn test_invalid_bars() {
        assert!(!bar(10.0, 9.0, 8.0, 10.5).is_valid()); // high below close
        assert!(!bar(10.0, 11.0, 10.2, 10.5).is_valid()); // low above open
        assert!(!bar(0.0, 11.0, 0.0, 10.5).is_valid()); // zero price
        assert!(!bar(f64::NAN, 11.0, 9.0, 10.5).is_valid());
    }

    #[test]
    fn test_doji_is_valid() {
        assert!(bar(10.0, 10.0, 10.0, 10.0).is_valid());
    }
}
