//! Scan pipeline.
//!
//! Wires the stages together for one run:
//! 1. Resolve sessions (output window plus look-back buffer)
//! 2. Fetch one grouped snapshot per session
//! 3. Pre-filter on the output window
//! 4. Compute features on the survivors
//! 5. Match patterns and assemble rows
//!
//! Request errors (bad range, invalid parameters, patterns reading columns
//! the feature engine never produces) are raised before any network call.
//! Per-session fetch failures are reported in the [`ScanReport`], not raised.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use scanner_common::{CalendarConfig, Config, Validate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assemble::{ResultAssembler, SignalRow};
use crate::calendar::TradingCalendar;
use crate::data::{FetchSummary, FetcherConfig, GroupedBarFetcher, GroupedBarsProvider};
use crate::error::{Result, ScanError, ScanWarning};
use crate::features::FeatureEngine;
use crate::panel::{OutputWindow, Panel};
use crate::params::{FeatureConfig, PrefilterConfig, ScanParameters, ScanProfile};
use crate::pattern::{PatternMatcher, PatternSet, SignalMatch};
use crate::prefilter::{PreFilter, PrefilterStats};

// ============================================================================
// Scan Request
// ============================================================================

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// First session that may produce a signal
    pub start: NaiveDate,
    /// Last session that may produce a signal (inclusive)
    pub end: NaiveDate,
    pub params: ScanParameters,
    pub patterns: PatternSet,
    /// Split/dividend adjusted bars
    pub adjusted: bool,
}

impl ScanRequest {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        params: ScanParameters,
        patterns: PatternSet,
    ) -> Self {
        Self {
            start,
            end,
            params,
            patterns,
            adjusted: true,
        }
    }

    /// Request unadjusted bars.
    pub fn unadjusted(mut self) -> Self {
        self.adjusted = false;
        self
    }

    pub fn window(&self) -> OutputWindow {
        OutputWindow::new(self.start, self.end)
    }
}

// ============================================================================
// Scan Report
// ============================================================================

/// Results of one run together with its fetch and filter accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Run ID (timestamp-based)
    pub id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Sessions fetched, look-back included
    pub sessions_requested: usize,
    /// Sessions inside the output window
    pub output_sessions: usize,
    pub fetch: FetchSummary,
    pub prefilter: PrefilterStats,
    pub warnings: Vec<ScanWarning>,
    pub signals: Vec<SignalRow>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl ScanReport {
    /// Check if some sessions could not be fetched.
    pub fn is_partial(&self) -> bool {
        self.fetch.failed > 0
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "Scanned {} to {} in {:.1}s: {} signals, {}/{} sessions fetched ({} failed), {} of {} symbols past pre-filter",
            self.start,
            self.end,
            self.duration_secs,
            self.signals.len(),
            self.fetch.succeeded,
            self.fetch.attempted,
            self.fetch.failed,
            self.prefilter.symbols_out,
            self.prefilter.symbols_in,
        )
    }
}

/// Output of the in-memory stages for one panel.
#[derive(Debug, Clone, Default)]
pub struct ScanStages {
    pub prefilter: PrefilterStats,
    pub warnings: Vec<ScanWarning>,
    pub matches: Vec<SignalMatch>,
    pub rows: Vec<SignalRow>,
}

// ============================================================================
// Scan Pipeline
// ============================================================================

/// One configurable pipeline driven by a request's parameters and patterns.
pub struct ScanPipeline {
    fetcher: GroupedBarFetcher,
    calendar: TradingCalendar,
    prefilter: PrefilterConfig,
    features: FeatureEngine,
    lookback_days: u32,
}

impl ScanPipeline {
    /// Create a pipeline with default stage settings.
    pub fn new(provider: Arc<dyn GroupedBarsProvider>, fetcher: FetcherConfig) -> Self {
        Self {
            fetcher: GroupedBarFetcher::new(provider, fetcher),
            calendar: TradingCalendar::nyse(),
            prefilter: PrefilterConfig::default(),
            features: FeatureEngine::default(),
            lookback_days: CalendarConfig::default().lookback_days,
        }
    }

    /// Create from the config file and a scan profile.
    pub fn from_config(
        provider: Arc<dyn GroupedBarsProvider>,
        config: &Config,
        profile: &ScanProfile,
    ) -> Self {
        Self::new(provider, FetcherConfig::from_config(config))
            .with_calendar(TradingCalendar::from_config(&config.calendar))
            .with_prefilter(profile.prefilter.clone())
            .with_features(profile.features.clone())
            .with_lookback_days(profile.lookback_days.unwrap_or(config.calendar.lookback_days))
    }

    pub fn with_calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_prefilter(mut self, prefilter: PrefilterConfig) -> Self {
        self.prefilter = prefilter;
        self
    }

    pub fn with_features(mut self, features: FeatureConfig) -> Self {
        self.features = FeatureEngine::new(features);
        self
    }

    /// Calendar days of history fetched before the request start.
    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Check everything that can be checked without data.
    pub fn validate(&self, request: &ScanRequest) -> Result<()> {
        if request.end < request.start {
            return Err(ScanError::InvalidDateRange {
                start: request.start,
                end: request.end,
            });
        }

        request.params.validate()?;
        self.prefilter.validate()?;
        self.features.config().validate()?;
        request.patterns.validate()?;

        let columns = self.features.column_names();
        request
            .patterns
            .check_columns(|c| columns.iter().any(|n| n == c))
    }

    /// Run every stage for `request`.
    pub async fn run(&self, request: &ScanRequest) -> Result<ScanReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let id = format!("scan_{}", started_at.format("%Y%m%d_%H%M%S"));

        self.validate(request)?;

        let sessions = self
            .calendar
            .sessions_with_lookback(request.start, request.end, self.lookback_days)?;
        let window = request.window();
        let output_sessions = sessions.iter().filter(|s| window.contains(**s)).count();

        info!(
            run_id = %id,
            start = %request.start,
            end = %request.end,
            sessions = sessions.len(),
            output_sessions,
            patterns = request.patterns.len(),
            "Starting scan"
        );

        let (fetch, stages) = if output_sessions == 0 {
            warn!("No trading sessions in the requested range");
            (FetchSummary::default(), ScanStages::default())
        } else {
            let outcome = self.fetcher.fetch(&sessions, request.adjusted).await;
            let panel = Panel::from_bars(outcome.bars);
            (outcome.summary, self.scan_panel(panel, request)?)
        };

        let report = ScanReport {
            id,
            start: request.start,
            end: request.end,
            sessions_requested: sessions.len(),
            output_sessions,
            fetch,
            prefilter: stages.prefilter,
            warnings: stages.warnings,
            signals: stages.rows,
            started_at,
            duration_secs: timer.elapsed().as_secs_f64(),
        };

        if report.is_partial() {
            warn!(
                failed = report.fetch.failed,
                "Scan completed with missing sessions"
            );
        }
        info!("{}", report.summary());

        Ok(report)
    }

    /// Run the in-memory stages on an already assembled panel.
    pub fn scan_panel(&self, panel: Panel, request: &ScanRequest) -> Result<ScanStages> {
        let window = request.window();
        let matcher = PatternMatcher::new(request.patterns.clone())?;

        let (reduced, prefilter) =
            PreFilter::new(self.prefilter.clone(), request.params.clone()).apply(&panel, window);
        let output = self.features.compute(reduced);
        let matches = matcher.match_panel(&output.features, window)?;
        let rows = ResultAssembler::new().assemble(&matches);

        Ok(ScanStages {
            prefilter,
            warnings: output.warnings,
            matches,
            rows,
        })
    }
}
