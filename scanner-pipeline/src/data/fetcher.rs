//! Grouped-bar fetcher.
//!
//! Issues one grouped request per trading session over a bounded worker
//! pool and assembles the results into one long-format bar table sorted by
//! (symbol, session). A failed session is logged, recorded in the summary
//! and skipped; it never aborts its siblings.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::provider::GroupedBarsProvider;
use super::Bar;
use crate::error::FetchError;

// ============================================================================
// Fetcher Configuration
// ============================================================================

/// Worker pool and retry policy.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Concurrent session fetches
    pub workers: usize,
    /// Retries after the first attempt (transient failures only)
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per retry
    pub retry_backoff: Duration,
    /// Upper bound on a single attempt, independent of the HTTP client timeout.
    /// Starts after the provider's throttle releases the request.
    pub session_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            session_timeout: Duration::from_secs(30),
        }
    }
}

impl FetcherConfig {
    /// Build from the shared config file sections.
    pub fn from_config(config: &scanner_common::Config) -> Self {
        Self {
            workers: config.fetch.workers.max(1),
            max_retries: config.fetch.max_retries,
            retry_backoff: Duration::from_millis(config.fetch.retry_backoff_ms),
            session_timeout: Duration::from_secs(config.provider.request_timeout_secs),
        }
    }
}

// ============================================================================
// Fetch Outcome
// ============================================================================

/// A session that could not be fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSession {
    pub session: NaiveDate,
    pub error: String,
    /// Whether the last error was transient (retries exhausted)
    pub transient: bool,
    pub attempts: u32,
}

/// Per-run fetch accounting, always returned alongside the bars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchSummary {
    /// Sessions requested
    pub attempted: usize,
    /// Sessions fetched successfully
    pub succeeded: usize,
    /// Sessions excluded after failing
    pub failed: usize,
    /// Outbound requests including retries
    pub requests: u32,
    /// Records received from the provider
    pub rows_received: usize,
    /// Records dropped for violating the bar invariants
    pub rows_rejected: usize,
    /// Repeated (symbol, session) records dropped
    pub duplicates_dropped: usize,
    /// Failed sessions in chronological order
    pub failed_sessions: Vec<FailedSession>,
}

impl FetchSummary {
    /// Check if every requested session was fetched.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Bars sorted by (symbol, session) plus the fetch summary.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub bars: Vec<Bar>,
    pub summary: FetchSummary,
}

struct SessionResult {
    session: NaiveDate,
    attempts: u32,
    result: Result<Vec<Bar>, FetchError>,
}

// ============================================================================
// Grouped Bar Fetcher
// ============================================================================

/// Fetches one grouped snapshot per session with bounded concurrency.
pub struct GroupedBarFetcher {
    provider: Arc<dyn GroupedBarsProvider>,
    config: FetcherConfig,
}

impl GroupedBarFetcher {
    /// Create a fetcher around a provider.
    pub fn new(provider: Arc<dyn GroupedBarsProvider>, config: FetcherConfig) -> Self {
        Self { provider, config }
    }

    /// Fetcher configuration.
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch every session and assemble the long-format bar table.
    ///
    /// Sessions complete in any order; the returned bars are re-sorted by
    /// (symbol, session) before they are handed on.
    pub async fn fetch(&self, sessions: &[NaiveDate], adjusted: bool) -> FetchOutcome {
        let workers = self.config.workers.max(1);
        info!(
            provider = self.provider.name(),
            sessions = sessions.len(),
            workers,
            adjusted,
            "Fetching grouped daily bars"
        );

        let mut summary = FetchSummary {
            attempted: sessions.len(),
            ..FetchSummary::default()
        };
        let mut bars = Vec::new();

        let mut completed = stream::iter(sessions.iter().copied())
            .map(|session| self.fetch_session(session, adjusted))
            .buffer_unordered(workers);

        while let Some(done) = completed.next().await {
            summary.requests += done.attempts;
            match done.result {
                Ok(session_bars) => {
                    summary.succeeded += 1;
                    summary.rows_received += session_bars.len();

                    let before = bars.len();
                    bars.extend(
                        session_bars
                            .into_iter()
                            .filter(|b| b.session == done.session && b.is_valid()),
                    );
                    let kept = bars.len() - before;
                    debug!(session = %done.session, rows = kept, "Session fetched");
                }
                Err(e) => {
                    warn!(
                        session = %done.session,
                        attempts = done.attempts,
                        error = %e,
                        "Session fetch failed, skipping"
                    );
                    summary.failed += 1;
                    summary.failed_sessions.push(FailedSession {
                        session: done.session,
                        transient: e.is_transient(),
                        error: e.to_string(),
                        attempts: done.attempts,
                    });
                }
            }
        }
        drop(completed);

        let valid_rows = bars.len();
        summary.rows_rejected = summary.rows_received - valid_rows;

        bars.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.session.cmp(&b.session)));
        bars.dedup_by(|later, earlier| {
            later.symbol == earlier.symbol && later.session == earlier.session
        });
        summary.duplicates_dropped = valid_rows - bars.len();
        summary.failed_sessions.sort_by_key(|f| f.session);

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            requests = summary.requests,
            rows = bars.len(),
            rejected = summary.rows_rejected,
            "Grouped fetch complete"
        );

        FetchOutcome { bars, summary }
    }

    /// Fetch one session with bounded retries on transient errors.
    async fn fetch_session(&self, session: NaiveDate, adjusted: bool) -> SessionResult {
        let mut attempts = 0;

        loop {
            // Queueing for a rate-limit token is not part of the attempt
            self.provider.throttle().await;

            attempts += 1;
            let result = match tokio::time::timeout(
                self.config.session_timeout,
                self.provider.grouped_daily(session, adjusted),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Transient(format!(
                    "Timed out after {:?}",
                    self.config.session_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempts <= self.config.max_retries => {
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempts - 1);
                    debug!(
                        %session,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient fetch error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => {
                    return SessionResult {
                        session,
                        attempts,
                        result,
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(symbol: &str, session: NaiveDate, close: f64) -> Bar {
        Bar {
            symbol: symbol.into(),
            session,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100,
        }
    }

    /// Provider that fails each session a scripted number of times.
    struct ScriptedProvider {
        calls: AtomicU32,
        failures: Mutex<HashMap<NaiveDate, (u32, FetchError)>>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures: Mutex::new(HashMap::new()),
            }
        }

        fn fail(self, session: NaiveDate, times: u32, error: FetchError) -> Self {
            self.failures.lock().unwrap().insert(session, (times, error));
            self
        }
    }

    #[async_trait]
    impl GroupedBarsProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn grouped_daily(
            &self,
            session: NaiveDate,
            _adjusted: bool,
        ) -> Result<Vec<Bar>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some((remaining, error)) = failures.get_mut(&session) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(error.clone());
                    }
                }
            }
            Ok(vec![
                bar("ZZZ", session, 5.0),
                bar("AAA", session, 10.0),
                bar("AAA", session, 11.0), // duplicate
            ])
        }
    }

    fn fast_config() -> FetcherConfig {
        FetcherConfig {
            workers: 3,
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
            session_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_sorted_and_deduplicated() {
        let provider = Arc::new(ScriptedProvider::new());
        let fetcher = GroupedBarFetcher::new(provider.clone(), fast_config());

        let outcome = fetcher.fetch(&[day(3), day(2), day(4)], true).await;

        assert_eq!(outcome.bars.len(), 6);
        assert_eq!(outcome.summary.duplicates_dropped, 3);
        assert_eq!(outcome.bars[0].symbol, "AAA");
        assert_eq!(outcome.bars[0].session, day(2));
        assert!((outcome.bars[0].close - 10.0).abs() < 1e-12);
        assert_eq!(outcome.bars[3].symbol, "ZZZ");
        assert!(outcome
            .bars
            .windows(2)
            .all(|w| (&w[0].symbol, w[0].session) < (&w[1].symbol, w[1].session)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let provider = Arc::new(
            ScriptedProvider::new().fail(day(2), 2, FetchError::Transient("503".into())),
        );
        let fetcher = GroupedBarFetcher::new(provider.clone(), fast_config());

        let outcome = fetcher.fetch(&[day(2)], true).await;

        assert!(outcome.summary.is_complete());
        assert_eq!(outcome.summary.requests, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_retries() {
        let provider = Arc::new(
            ScriptedProvider::new().fail(day(2), 10, FetchError::Transient("503".into())),
        );
        let fetcher = GroupedBarFetcher::new(provider.clone(), fast_config());

        let outcome = fetcher.fetch(&[day(2), day(3)], true).await;

        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.summary.succeeded, 1);
        let failed = &outcome.summary.failed_sessions[0];
        assert_eq!(failed.session, day(2));
        assert_eq!(failed.attempts, 3);
        assert!(failed.transient);
        assert!(outcome.bars.iter().all(|b| b.session == day(3)));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new().fail(day(2), 1, FetchError::Permanent("404".into())),
        );
        let fetcher = GroupedBarFetcher::new(provider.clone(), fast_config());

        let outcome = fetcher.fetch(&[day(2)], true).await;

        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.summary.requests, 1);
        assert!(!outcome.summary.failed_sessions[0].transient);
        assert!(outcome.bars.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rows_rejected() {
        struct BadRows;

        #[async_trait]
        impl GroupedBarsProvider for BadRows {
            fn name(&self) -> &'static str {
                "bad"
            }

            async fn grouped_daily(
                &self,
                session: NaiveDate,
                _adjusted: bool,
            ) -> Result<Vec<Bar>, FetchError> {
                let mut broken = bar("BRK", session, 10.0);
                broken.high = 5.0;
                let mut wrong_day = bar("OLD", session, 10.0);
                wrong_day.session = day(1);
                Ok(vec![bar("OK", session, 10.0), broken, wrong_day])
            }
        }

        let fetcher = GroupedBarFetcher::new(Arc::new(BadRows), fast_config());
        let outcome = fetcher.fetch(&[day(2)], true).await;

        assert_eq!(outcome.bars.len(), 1);
        assert_eq!(outcome.summary.rows_received, 3);
        assert_eq!(outcome.summary.rows_rejected, 2);
    }

    #[tokio::test]
    async fn test_slow_session_times_out() {
        struct Slow;

        #[async_trait]
        impl GroupedBarsProvider for Slow {
            fn name(&self) -> &'static str {
                "slow"
            }

            async fn grouped_daily(
                &self,
                _session: NaiveDate,
                _adjusted: bool,
            ) -> Result<Vec<Bar>, FetchError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Vec::new())
            }
        }

        let config = FetcherConfig {
            workers: 1,
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
            session_timeout: Duration::from_millis(20),
        };
        let outcome = GroupedBarFetcher::new(Arc::new(Slow), config)
            .fetch(&[day(2)], true)
            .await;

        assert_eq!(outcome.summary.failed, 1);
        assert!(outcome.summary.failed_sessions[0].error.contains("Timed out"));
    }

    #[tokio::test]
    async fn test_empty_session_list() {
        let provider = Arc::new(ScriptedProvider::new());
        let outcome = GroupedBarFetcher::new(provider.clone(), fast_config())
            .fetch(&[], true)
            .await;

        assert!(outcome.bars.is_empty());
        assert_eq!(outcome.summary.attempted, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_wait_not_counted_as_timeout() {
        use crate::data::PolygonAdapter;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "results": [{"T": "AAPL", "o": 10.0, "h": 11.0, "l": 9.0, "c": 10.5, "v": 1000.0}]
            })))
            .expect(5)
            .mount(&server)
            .await;

        // 120 rpm: two requests at once, then one every half second
        let provider = PolygonAdapter::with_options(
            "test-key",
            server.uri(),
            Duration::from_secs(5),
            Some(120),
        );
        let config = FetcherConfig {
            workers: 5,
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
            session_timeout: Duration::from_millis(300),
        };
        let sessions: Vec<NaiveDate> = (2..=6).map(day).collect();

        let outcome = GroupedBarFetcher::new(Arc::new(provider), config)
            .fetch(&sessions, true)
            .await;

        assert_eq!(outcome.summary.failed, 0, "{:?}", outcome.summary.failed_sessions);
        assert_eq!(outcome.summary.succeeded, 5);
        assert_eq!(outcome.summary.requests, 5);
        assert_eq!(outcome.bars.len(), 5);
    }
}
