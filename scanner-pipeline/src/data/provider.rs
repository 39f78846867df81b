//! Grouped daily bars provider abstraction.
//!
//! The pipeline depends only on this contract: given a date, return every
//! symbol's bar for that date. Any source meeting it is substitutable.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::Bar;
use crate::error::FetchError;

/// Source of full-market daily bars, one date per request.
#[async_trait]
pub trait GroupedBarsProvider: Send + Sync {
    /// Provider name for logging (e.g., "polygon")
    fn name(&self) -> &'static str;

    /// Wait until the provider's request budget allows one more request.
    ///
    /// The fetcher awaits this before starting an attempt's timeout, so time
    /// spent queued for a rate-limit token never counts as a slow request.
    /// Providers without a request budget keep the default.
    async fn throttle(&self) {}

    /// Fetch every symbol's bar for `session`.
    ///
    /// Exactly one outbound request per call, sent immediately. A date with
    /// no trading returns an empty vector, not an error.
    async fn grouped_daily(
        &self,
        session: NaiveDate,
        adjusted: bool,
    ) -> Result<Vec<Bar>, FetchError>;
}
