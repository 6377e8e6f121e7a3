//! Window arithmetic, replay positioning and display helpers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::event::Hazard;

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
pub const MIN_RANGE: Duration = Duration::from_secs(10 * 60);
pub const MAX_RANGE: Duration = Duration::from_secs(24 * 60 * 60);
/// Rolling window shown for floods in live mode.
pub const FLOOD_LIVE_WINDOW_MS: i64 = 30 * DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimeMode {
    #[default]
    Live,
    HistoryDay,
    CustomRange,
}

/// Which USGS summary feed backs live quake mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuakeWindow {
    Hour,
    #[default]
    Day,
}

impl QuakeWindow {
    pub fn span_ms(self) -> i64 {
        match self {
            QuakeWindow::Hour => HOUR_MS,
            QuakeWindow::Day => DAY_MS,
        }
    }
}

/// Length of the live window for a hazard.
pub fn live_window_ms(hazard: Hazard, window: QuakeWindow) -> i64 {
    match hazard {
        Hazard::Earthquakes => window.span_ms(),
        Hazard::Floods => FLOOD_LIVE_WINDOW_MS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub mode: TimeMode,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn live(now: DateTime<Utc>, span_ms: i64) -> Self {
        Self {
            mode: TimeMode::Live,
            start: Some(now - chrono::Duration::milliseconds(span_ms)),
            end: Some(now),
        }
    }

    /// `[00:00:00.000Z, 23:59:59.999Z]` of `date`.
    pub fn history_day(date: NaiveDate) -> Self {
        let start = date
            .and_hms_milli_opt(0, 0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt));
        let end = date
            .and_hms_milli_opt(23, 59, 59, 999)
            .map(|dt| Utc.from_utc_datetime(&dt));
        Self {
            mode: TimeMode::HistoryDay,
            start,
            end,
        }
    }

    pub fn custom_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            mode: TimeMode::CustomRange,
            start,
            end,
        }
    }

    /// Bounds in epoch ms, if both ends are known.
    pub fn bounds_ms(&self) -> Option<(i64, i64)> {
        Some((self.start?.timestamp_millis(), self.end?.timestamp_millis()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    Missing,
    TooShort,
    TooLong,
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::Missing => f.write_str("Select both a start and an end time"),
            RangeError::TooShort => f.write_str("Range is too short (minimum 10 minutes)"),
            RangeError::TooLong => f.write_str("Range is too long (maximum 24 hours)"),
        }
    }
}

/// Checks a custom range: both ends set, `10min <= end - start <= 24h`.
pub fn validate_custom_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<RangeError> {
    let (Some(start), Some(end)) = (start, end) else {
        return Some(RangeError::Missing);
    };
    let span = (end - start).num_milliseconds();
    if span < MIN_RANGE.as_millis() as i64 {
        Some(RangeError::TooShort)
    } else if span > MAX_RANGE.as_millis() as i64 {
        Some(RangeError::TooLong)
    } else {
        None
    }
}

/// Timestamp currently shown: the window end when following live, else
/// `start + pct% of the window`.
pub fn replay_position(start_ms: i64, end_ms: i64, live_end: bool, scrub_pct: f64) -> i64 {
    if live_end {
        return end_ms;
    }
    let pct = scrub_pct.clamp(0.0, 100.0);
    start_ms + ((pct / 100.0) * (end_ms - start_ms) as f64) as i64
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compact count for badges: `1234 -> "1.2k"`.
pub fn to_kpi(n: usize) -> String {
    if n >= 1000 {
        format!("{:.1}k", n as f64 / 1000.0)
    } else {
        n.to_string()
    }
}

pub fn format_ago(now_ms: i64, ts_ms: i64) -> String {
    let s = (now_ms - ts_ms).max(0) / 1000;
    if s < 60 {
        return format!("{s}s ago");
    }
    let m = s / 60;
    if m < 60 {
        return format!("{m}m ago");
    }
    let h = m / 60;
    if h < 24 {
        return format!("{h}h ago");
    }
    format!("{}d ago", h / 24)
}

pub fn format_clock(at: DateTime<Utc>) -> String {
    at.format("%H:%M").to_string()
}

/// `"HH:MM → HH:MM"` from the window start to the scrubbed position.
pub fn format_range_label(start_ms: i64, end_ms: i64, scrub_pct: f64) -> String {
    let at = replay_position(start_ms, end_ms, false, scrub_pct);
    match (ms_to_datetime(start_ms), ms_to_datetime(at)) {
        (Some(start), Some(at)) => format!("{} → {}", format_clock(start), format_clock(at)),
        _ => "—".to_owned(),
    }
}

/// `YYYY-MM-DD HH:MMZ`, or `—` for timestamps chrono cannot represent.
pub fn format_utc_minute(ts_ms: i64) -> String {
    match ms_to_datetime(ts_ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%MZ").to_string(),
        None => "—".to_owned(),
    }
}

pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// A random past day within roughly five years, never today or later.
pub fn random_history_day<R: Rng + ?Sized>(rng: &mut R, today: NaiveDate) -> NaiveDate {
    let days_back: i64 = rng.gen_range(1..=5 * 365);
    today - chrono::Duration::days(days_back)
}
