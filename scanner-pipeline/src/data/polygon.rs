//! Polygon.io grouped daily aggregates adapter.
//!
//! # API Documentation
//! <https://polygon.io/docs/stocks/get_v2_aggs_grouped_locale_us_market_stocks__date>
//!
//! # Features
//! - One request returns the daily bar of every US stock for one date
//! - Adjusted or unadjusted prices via the `adjusted` query flag
//!
//! # Rate Limits
//! - Free tier: 5 requests/minute; paid tiers are effectively unlimited
//! - Proactive rate limiting is optional and configured per adapter; the
//!   token is taken in `throttle`, before the fetcher starts its timeout

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::provider::GroupedBarsProvider;
use super::rate_limiter::{RateLimiter, SharedRateLimiter};
use super::Bar;
use crate::error::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// Polygon REST base URL
const POLYGON_API_BASE: &str = "https://api.polygon.io";

/// Grouped daily endpoint; the date is appended as `YYYY-MM-DD`
const GROUPED_ENDPOINT: &str = "/v2/aggs/grouped/locale/us/market/stocks";

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Polygon Adapter
// ============================================================================

/// Polygon adapter for grouped daily bars.
///
/// Owns its HTTP client; create one per scan run and drop it afterwards.
pub struct PolygonAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    rate_limiter: Option<SharedRateLimiter>,
}

impl PolygonAdapter {
    /// Create an adapter against the public API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_options(
            api_key,
            POLYGON_API_BASE,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            None,
        )
    }

    /// Create with explicit base URL, request timeout and optional rate limit.
    pub fn with_options(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        rate_limit_rpm: Option<u32>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            rate_limiter: rate_limit_rpm.map(|rpm| Arc::new(RateLimiter::new("polygon", rpm))),
        }
    }

    /// Create from config. Returns `None` when no API key is configured.
    pub fn from_config(config: &scanner_common::Config) -> Option<Self> {
        let api_key = config.api_key()?;
        Some(Self::with_options(
            api_key,
            config.provider.base_url.clone(),
            Duration::from_secs(config.provider.request_timeout_secs),
            config.provider.rate_limit_rpm,
        ))
    }

    fn grouped_url(&self, session: NaiveDate) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            GROUPED_ENDPOINT,
            session.format("%Y-%m-%d")
        )
    }

    /// Convert API records into bars for `session`.
    ///
    /// Records with missing prices are passed through with NaN fields so the
    /// fetcher's validation counts them as rejected.
    fn parse_results(session: NaiveDate, results: Vec<PolygonAgg>) -> Vec<Bar> {
        results
            .into_iter()
            .filter_map(|agg| {
                let symbol = agg.ticker?;
                Some(Bar {
                    symbol,
                    session,
                    open: agg.o.unwrap_or(f64::NAN),
                    high: agg.h.unwrap_or(f64::NAN),
                    low: agg.l.unwrap_or(f64::NAN),
                    close: agg.c.unwrap_or(f64::NAN),
                    volume: agg.v.filter(|v| v.is_finite() && *v > 0.0).map_or(0, |v| v.round() as u64),
                })
            })
            .collect()
    }
}

// ============================================================================
// GroupedBarsProvider Implementation
// ============================================================================

#[async_trait]
impl GroupedBarsProvider for PolygonAdapter {
    fn name(&self) -> &'static str {
        "polygon"
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
    }

    async fn grouped_daily(
        &self,
        session: NaiveDate,
        adjusted: bool,
    ) -> Result<Vec<Bar>, FetchError> {
        let url = self.grouped_url(session);
        debug!(url = %url, %session, adjusted, "Fetching grouped daily bars");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("adjusted", if adjusted { "true" } else { "false" }),
                ("apiKey", self.api_key.as_str()),
            ])
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Transient("Request timeout".into())
                } else if e.is_connect() {
                    FetchError::Transient("Connection failed".into())
                } else {
                    FetchError::Transient(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), &body));
        }

        // A body that stops arriving is a transport failure; only a complete
        // body that does not decode is permanent.
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Transient("Timed out reading response body".into())
            } else {
                FetchError::Transient(format!(
                    "Failed to read response body: {}",
                    e.without_url()
                ))
            }
        })?;
        let payload = decode_payload(&body)?;

        if let Some(status) = payload.status.as_deref() {
            if !matches!(status, "OK" | "DELAYED") {
                let msg = payload
                    .error
                    .or(payload.message)
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Err(FetchError::Permanent(format!("{}: {}", status, msg)));
            }
        }

        let bars = Self::parse_results(session, payload.results.unwrap_or_default());
        debug!(%session, count = bars.len(), "Parsed grouped daily bars");
        Ok(bars)
    }
}

fn decode_payload(body: &[u8]) -> Result<GroupedResponse, FetchError> {
    serde_json::from_slice(body)
        .map_err(|e| FetchError::Permanent(format!("Failed to parse response: {}", e)))
}

// ============================================================================
// API Response Types
// ============================================================================

/// Grouped daily response wrapper
#[derive(Debug, Deserialize)]
struct GroupedResponse {
    /// "OK", "DELAYED", "ERROR", "NOT_AUTHORIZED", ...
    status: Option<String>,
    /// Absent on holidays and for dates without data
    results: Option<Vec<PolygonAgg>>,
    error: Option<String>,
    message: Option<String>,
}

/// One symbol's aggregate.
///
/// Field names are abbreviated in the API:
/// - T: ticker
/// - o/h/l/c: open/high/low/close
/// - v: volume (may be fractional)
#[derive(Debug, Deserialize)]
struct PolygonAgg {
    #[serde(rename = "T")]
    ticker: Option<String>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    c: Option<f64>,
    v: Option<f64>,
}

// ============================================================================
// Tests
// ============================================================================
