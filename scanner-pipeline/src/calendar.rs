//! Exchange trading-day calendar.
//!
//! Resolves a date range into the ordered list of NYSE full-day sessions.
//! Holidays are derived by rule per year, so the calendar needs no data
//! files. The rules match the exchange from 1972 onward.

use std::collections::BTreeSet;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use scanner_common::CalendarConfig;

use crate::error::{Result, ScanError};

/// One-off full-day closures that the holiday rules do not cover.
///
/// Covers 1972 onward, matching the holiday rules (Monday holidays took
/// effect in 1971). Closures before that, such as the 1968 paperwork-crisis
/// Wednesdays, are not listed; add them through `extra_closures` if needed.
const SPECIAL_CLOSURES: &[(i32, u32, u32)] = &[
    (1972, 12, 28),
    (1973, 1, 25),
    (1977, 7, 14),
    (1985, 9, 27),
    (1994, 4, 27),
    (2001, 9, 11),
    (2001, 9, 12),
    (2001, 9, 13),
    (2001, 9, 14),
    (2004, 6, 11),
    (2007, 1, 2),
    (2012, 10, 29),
    (2012, 10, 30),
    (2018, 12, 5),
    (2025, 1, 9),
];

// ============================================================================
// Trading Calendar
// ============================================================================

/// NYSE trading calendar.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    extra_closures: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    /// Calendar with the built-in NYSE rules only.
    pub fn nyse() -> Self {
        Self::default()
    }

    /// Calendar with configured extra closures.
    pub fn from_config(config: &CalendarConfig) -> Self {
        Self::nyse().with_extra_closures(config.extra_closures.iter().copied())
    }

    /// Add closures on top of the rule-based holidays.
    pub fn with_extra_closures(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.extra_closures.extend(dates);
        self
    }

    /// Check whether the exchange is open on `date`.
    pub fn is_session(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && self.closure_reason(date).is_none()
    }

    /// Name of the closure on a weekday, if any.
    pub fn closure_reason(&self, date: NaiveDate) -> Option<&'static str> {
        if self.extra_closures.contains(&date) {
            return Some("Configured closure");
        }
        if is_special_closure(date) {
            return Some("Special closure");
        }
        holidays_for_year(date.year())
            .into_iter()
            .find(|(d, _)| *d == date)
            .map(|(_, name)| name)
    }

    /// Sessions in `[start, end]`, ascending and duplicate-free.
    pub fn sessions(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
        if end < start {
            return Err(ScanError::InvalidDateRange { start, end });
        }

        let closed: BTreeSet<NaiveDate> = (start.year()..=end.year())
            .flat_map(holidays_for_year)
            .map(|(d, _)| d)
            .chain(
                SPECIAL_CLOSURES
                    .iter()
                    .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            )
            .chain(self.extra_closures.iter().copied())
            .collect();

        Ok(start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !is_weekend(*d) && !closed.contains(d))
            .collect())
    }

    /// Sessions from `lookback_days` calendar days before `start` through `end`.
    ///
    /// The range check is done on `(start, end)` so a bad request fails the
    /// same way with or without a buffer.
    pub fn sessions_with_lookback(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        lookback_days: u32,
    ) -> Result<Vec<NaiveDate>> {
        if end < start {
            return Err(ScanError::InvalidDateRange { start, end });
        }

        let fetch_start = start
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .unwrap_or(NaiveDate::MIN);
        self.sessions(fetch_start, end)
    }
}

// ============================================================================
// Holiday Rules
// ============================================================================

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn is_special_closure(date: NaiveDate) -> bool {
    SPECIAL_CLOSURES
        .iter()
        .any(|&(y, m, d)| date.year() == y && date.month() == m && date.day() == d)
}

/// Saturday holidays move to Friday, Sunday holidays to Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().unwrap_or(date),
        Weekday::Sun => date.succ_opt().unwrap_or(date),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    nth_weekday(year, month, weekday, 5).or_else(|| nth_weekday(year, month, weekday, 4))
}

/// Gregorian Easter Sunday (anonymous algorithm).
pub(crate) fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// Full-day NYSE holidays (as observed) falling in `year`.
fn holidays_for_year(year: i32) -> Vec<(NaiveDate, &'static str)> {
    let mut out = Vec::with_capacity(10);
    let mut push = |date: Option<NaiveDate>, name: &'static str| {
        if let Some(d) = date.filter(|d| d.year() == year) {
            out.push((d, name));
        }
    };

    // New Year's Day: a Saturday holiday is not moved back into December.
    if let Some(jan1) = NaiveDate::from_ymd_opt(year, 1, 1) {
        match jan1.weekday() {
            Weekday::Sat => {}
            Weekday::Sun => push(jan1.succ_opt(), "New Year's Day"),
            _ => push(Some(jan1), "New Year's Day"),
        }
    }

    if year >= 1998 {
        push(nth_weekday(year, 1, Weekday::Mon, 3), "Martin Luther King Jr. Day");
    }
    push(nth_weekday(year, 2, Weekday::Mon, 3), "Washington's Birthday");
    push(
        easter_sunday(year).and_then(|e| e.checked_sub_days(Days::new(2))),
        "Good Friday",
    );
    push(last_weekday(year, 5, Weekday::Mon), "Memorial Day");
    if year >= 2022 {
        push(NaiveDate::from_ymd_opt(year, 6, 19).map(observed), "Juneteenth");
    }
    push(NaiveDate::from_ymd_opt(year, 7, 4).map(observed), "Independence Day");
    push(nth_weekday(year, 9, Weekday::Mon, 1), "Labor Day");
    push(nth_weekday(year, 11, Weekday::Thu, 4), "Thanksgiving Day");
    push(NaiveDate::from_ymd_opt(year, 12, 25).map(observed), "Christmas Day");

    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test_case(2024, 1, 1 ; "new years day")]
    #[test_case(2023, 1, 2 ; "new years observed monday")]
    #[test_case(2024, 1, 15 ; "mlk day")]
    #[test_case(2024, 2, 19 ; "presidents day")]
    #[test_case(2024, 3, 29 ; "good friday 2024")]
    #[test_case(2025, 4, 18 ; "good friday 2025")]
    #[test_case(2024, 5, 27 ; "memorial day")]
    #[test_case(2022, 6, 20 ; "juneteenth observed monday")]
    #[test_case(2024, 7, 4 ; "independence day")]
    #[test_case(2024, 9, 2 ; "labor day")]
    #[test_case(2024, 11, 28 ; "thanksgiving")]
    #[test_case(2021, 12, 24 ; "christmas observed friday")]
    #[test_case(2022, 12, 26 ; "christmas observed monday")]
    #[test_case(2018, 12, 5 ; "special closure")]
    #[test_case(1994, 4, 27 ; "nixon funeral")]
    #[test_case(1985, 9, 27 ; "hurricane gloria")]
    #[test_case(1977, 7, 14 ; "new york blackout")]
    fn test_holiday_is_closed(y: i32, m: u32, d: u32) {
        let calendar = TradingCalendar::nyse();
        assert!(!calendar.is_session(date(y, m, d)));
        assert!(calendar.closure_reason(date(y, m, d)).is_some());
    }

    #[test_case(2021, 12, 31 ; "saturday new year not observed friday")]
    #[test_case(2021, 6, 18 ; "juneteenth before 2022")]
    #[test_case(2024, 3, 28 ; "day before good friday")]
    #[test_case(2024, 11, 29 ; "day after thanksgiving")]
    fn test_regular_day_is_open(y: i32, m: u32, d: u32) {
        assert!(TradingCalendar::nyse().is_session(date(y, m, d)));
    }

    #[test]
    fn test_easter_dates() {
        assert_eq!(easter_sunday(2024), Some(date(2024, 3, 31)));
        assert_eq!(easter_sunday(2025), Some(date(2025, 4, 20)));
        assert_eq!(easter_sunday(2000), Some(date(2000, 4, 23)));
    }

    #[test]
    fn test_january_2024_session_count() {
        let sessions = TradingCalendar::nyse()
            .sessions(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap();
        assert_eq!(sessions.len(), 21);
        assert_eq!(sessions[0], date(2024, 1, 2));
        assert_eq!(*sessions.last().unwrap(), date(2024, 1, 31));
    }

    #[test]
    fn test_sessions_strictly_increasing_without_weekends() {
        let sessions = TradingCalendar::nyse()
            .sessions(date(2023, 1, 1), date(2024, 12, 31))
            .unwrap();
        assert!(sessions.windows(2).all(|w| w[0] < w[1]));
        assert!(sessions.iter().all(|d| !is_weekend(*d)));
        // 2023 and 2024 both had 250 and 252 sessions respectively.
        assert_eq!(sessions.len(), 250 + 252);
    }

    #[test]
    fn test_invalid_range() {
        let err = TradingCalendar::nyse()
            .sessions(date(2024, 2, 1), date(2024, 1, 1))
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidDateRange { .. }));
    }

    #[test]
    fn test_single_day_range() {
        let calendar = TradingCalendar::nyse();
        assert_eq!(
            calendar.sessions(date(2024, 1, 3), date(2024, 1, 3)).unwrap(),
            vec![date(2024, 1, 3)]
        );
        assert!(calendar
            .sessions(date(2024, 1, 6), date(2024, 1, 7))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_lookback_prepends_history() {
        let calendar = TradingCalendar::nyse();
        let plain = calendar.sessions(date(2024, 2, 1), date(2024, 2, 29)).unwrap();
        let buffered = calendar
            .sessions_with_lookback(date(2024, 2, 1), date(2024, 2, 29), 31)
            .unwrap();

        assert!(buffered.len() > plain.len());
        assert_eq!(buffered[0], date(2024, 1, 2));
        assert!(buffered.ends_with(&plain));
    }

    #[test]
    fn test_lookback_still_validates_range() {
        let err = TradingCalendar::nyse()
            .sessions_with_lookback(date(2024, 2, 1), date(2024, 1, 31), 365)
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidDateRange { .. }));
    }

    #[test]
    fn test_extra_closures() {
        let calendar = TradingCalendar::nyse().with_extra_closures([date(2024, 1, 3)]);
        assert!(!calendar.is_session(date(2024, 1, 3)));
        assert_eq!(
            calendar.closure_reason(date(2024, 1, 3)),
            Some("Configured closure")
        );
        let sessions = calendar.sessions(date(2024, 1, 2), date(2024, 1, 5)).unwrap();
        assert_eq!(sessions, vec![date(2024, 1, 2), date(2024, 1, 4), date(2024, 1, 5)]);
    }
}
