//! Scanner Pipeline Library
//!
//! Full-market daily scans in three stages: fetch every symbol's bars with
//! one grouped request per session, shrink the panel with a cheap
//! pre-filter, then compute indicators and match named patterns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         scanner-pipeline                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Calendar ─▶ Grouped Fetcher ─▶ Pre-Filter ─▶ Features ─▶ Matcher    │
//! │  (sessions)  (1 req/session)    (output rows)  (ATR, EMA)  (patterns)│
//! │                                                              │       │
//! │                                                   Result Assembler   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Look-back only
//! - Every derived value at session `d` reads sessions `<= d` of the same symbol
//! - ATR and volume baselines are shifted one session
//! - Missing values never pass a comparison
//!
//! ## Output window
//! - History before the start date is fetched for window warm-up
//! - Only sessions inside `[start, end]` are filtered and can produce signals
//!
//! ## Partial data
//! - A failed session is excluded and counted, never interpolated
//! - The report always carries the fetch summary next to the signals

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod assemble;
pub mod calendar;
pub mod data;
pub mod error;
pub mod features;
pub mod panel;
pub mod params;
pub mod pattern;
pub mod pipeline;
pub mod prefilter;
pub mod report;

pub use assemble::{ResultAssembler, SignalRow};
pub use calendar::TradingCalendar;
pub use data::{
    Bar, FetchOutcome, FetchSummary, FetcherConfig, GroupedBarFetcher, GroupedBarsProvider,
    PolygonAdapter,
};
pub use error::{FetchError, Result, ScanError, ScanWarning};
pub use features::{FeatureEngine, FeaturePanel};
pub use panel::{OutputWindow, Panel};
pub use params::{FeatureConfig, PrefilterConfig, ScanParameters, ScanProfile};
pub use pattern::{Pattern, PatternMatcher, PatternSet, SignalMatch};
pub use pipeline::{ScanPipeline, ScanReport, ScanRequest};
pub use prefilter::{PreFilter, PrefilterStats};
