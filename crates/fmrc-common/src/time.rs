//! Time handling utilities for forecast model runs.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Initiation instant of a model run.
pub type RunTime = DateTime<Utc>;

/// Elapsed time from a run's initiation to a forecast valid time.
///
/// Stored as whole seconds so offsets can be compared, hashed and
/// persisted exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForecastOffset(i64);

impl ForecastOffset {
    pub const ZERO: ForecastOffset = ForecastOffset(0);

    pub fn from_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self(minutes * 60)
    }

    pub fn from_hours(hours: i64) -> Self {
        Self(hours * 3600)
    }

    /// Offset between a run and a valid time.
    pub fn between(run_time: RunTime, valid_time: DateTime<Utc>) -> Self {
        Self((valid_time - run_time).num_seconds())
    }

    pub fn seconds(&self) -> i64 {
        self.0
    }

    /// Offset in fractional hours (for display and CF output).
    pub fn hours(&self) -> f64 {
        self.0 as f64 / 3600.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.0)
    }

    /// `run_time + self`, or `None` when it falls outside chrono's range.
    pub fn valid_at(&self, run_time: RunTime) -> Option<DateTime<Utc>> {
        Duration::try_seconds(self.0).and_then(|d| run_time.checked_add_signed(d))
    }
}

impl fmt::Display for ForecastOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 3600 == 0 {
            write!(f, "{}h", self.0 / 3600)
        } else if self.0 % 60 == 0 {
            write!(f, "{}m", self.0 / 60)
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

/// A forecast valid time expressed as run time plus offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidTime {
    /// Model run/reference time
    pub run_time: RunTime,
    /// Forecast offset from the run time
    pub offset: ForecastOffset,
}

impl ValidTime {
    pub fn new(run_time: RunTime, offset: ForecastOffset) -> Self {
        Self { run_time, offset }
    }

    /// Create from analysis time (offset = 0)
    pub fn analysis(run_time: RunTime) -> Self {
        Self {
            run_time,
            offset: ForecastOffset::ZERO,
        }
    }

    /// The absolute instant (run time + offset)
    pub fn valid_datetime(&self) -> DateTime<Utc> {
        self.run_time + self.offset.duration()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Invalid time units: {0}")]
    InvalidUnits(String),
}

/// Parse an ISO 8601-like instant. Values without a zone are taken as UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS`
/// (optionally with fractional seconds, a trailing `Z` or ` UTC`),
/// minute precision, and date-only values.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let trimmed = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = trimmed
        .strip_suffix(" UTC")
        .or_else(|| trimmed.strip_suffix(" GMT"))
        .or_else(|| trimmed.strip_suffix('Z'))
        .unwrap_or(trimmed)
        .trim();

    const FORMATS: [&str; 6] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(naive, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

/// CF-convention time units: `<unit> since <reference instant>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    /// Length of one unit in seconds
    pub unit_seconds: i64,
    /// Reference instant the values count from
    pub epoch: DateTime<Utc>,
}

impl TimeUnits {
    pub fn new(unit_seconds: i64, epoch: DateTime<Utc>) -> Self {
        Self {
            unit_seconds,
            epoch,
        }
    }

    /// Hours since the given epoch.
    pub fn hours_since(epoch: DateTime<Utc>) -> Self {
        Self::new(3600, epoch)
    }

    /// Convert an axis value to an instant, rounding to whole seconds.
    ///
    /// Returns `None` for non-finite values or values outside the
    /// representable range.
    pub fn to_instant(&self, value: f64) -> Option<DateTime<Utc>> {
        let seconds = value * self.unit_seconds as f64;
        if !seconds.is_finite() || seconds.abs() > 1.0e15 {
            return None;
        }
        let delta = Duration::try_seconds(seconds.round() as i64)?;
        self.epoch.checked_add_signed(delta)
    }

    fn unit_seconds_for(unit: &str) -> Option<i64> {
        match unit {
            "seconds" | "second" | "secs" | "sec" | "s" => Some(1),
            "minutes" | "minute" | "mins" | "min" => Some(60),
            "hours" | "hour" | "hrs" | "hr" | "h" => Some(3600),
            "days" | "day" | "d" => Some(86_400),
            _ => None,
        }
    }
}

impl FromStr for TimeUnits {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        let pos = lower
            .find(" since ")
            .ok_or_else(|| TimeParseError::InvalidUnits(s.to_string()))?;

        let unit = lower[..pos].trim();
        let unit_seconds = Self::unit_seconds_for(unit)
            .ok_or_else(|| TimeParseError::InvalidUnits(s.to_string()))?;

        // Slice the original string so a trailing 'Z' keeps its case.
        let reference = s
            .get(pos + " since ".len()..)
            .ok_or_else(|| TimeParseError::InvalidUnits(s.to_string()))?
            .trim();
        let epoch = parse_instant(reference)?;

        Ok(Self::new(unit_seconds, epoch))
    }
}

/// True when a units string looks like CF time units.
pub fn is_time_units(units: &str) -> bool {
    units.to_lowercase().contains(" since ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_instant_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(parse_instant("2024-01-15T12:00:00Z").unwrap(), expected);
        assert_eq!(parse_instant("2024-01-15 12:00:00").unwrap(), expected);
        assert_eq!(parse_instant("2024-01-15T12:00").unwrap(), expected);
        assert_eq!(parse_instant("2024-01-15 12:00:00 UTC").unwrap(), expected);

        let date_only = parse_instant("2024-01-15").unwrap();
        assert_eq!(date_only.day(), 15);
        assert_eq!(date_only.hour(), 0);

        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn test_time_units_parse() {
        let units: TimeUnits = "hours since 2024-01-01 00:00:00".parse().unwrap();
        assert_eq!(units.unit_seconds, 3600);
        assert_eq!(
            units.to_instant(6.0),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap())
        );

        let days: TimeUnits = "Days since 2024-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(
            days.to_instant(0.5),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );

        assert!("furlongs since 2024-01-01".parse::<TimeUnits>().is_err());
        assert!("hours".parse::<TimeUnits>().is_err());
        assert!(is_time_units("minutes since 1970-01-01"));
        assert!(!is_time_units("degrees_north"));
    }

    #[test]
    fn test_time_units_rejects_non_finite() {
        let units = TimeUnits::hours_since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(units.to_instant(f64::NAN), None);
        assert_eq!(units.to_instant(f64::INFINITY), None);
    }

    #[test]
    fn test_forecast_offset_display() {
        assert_eq!(ForecastOffset::from_hours(6).to_string(), "6h");
        assert_eq!(ForecastOffset::from_minutes(90).to_string(), "90m");
        assert_eq!(ForecastOffset::from_seconds(45).to_string(), "45s");
    }

    #[test]
    fn test_valid_time() {
        let run = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let vt = ValidTime::new(run, ForecastOffset::from_hours(18));
        assert_eq!(
            vt.valid_datetime(),
            Utc.with_ymd_and_hms(2024, 1, 16, 6, 0, 0).unwrap()
        );
        assert_eq!(
            ForecastOffset::between(run, vt.valid_datetime()),
            ForecastOffset::from_hours(18)
        );
        assert_eq!(ValidTime::analysis(run).valid_datetime(), run);
    }

    #[test]
    fn test_valid_at_out_of_range() {
        let run = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            ForecastOffset::from_hours(-12).valid_at(run),
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).single()
        );
        assert_eq!(ForecastOffset::from_seconds(9_000_000_000_000_000_000).valid_at(run), None);
        assert_eq!(ForecastOffset::from_seconds(i64::MIN).valid_at(run), None);
    }
}
