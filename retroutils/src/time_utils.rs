//! Time formatting and arithmetic utilities.
//!
//! This module converts between the representations used across RetroTV:
//! - `chrono` wall-clock instants (the broadcast timeline)
//! - `std::time::Duration` (tunable delays)
//! - fractional seconds (clip offsets)
//! - `HH:MM:SS` strings (logs and countdowns)

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Formats a duration in seconds as HH:MM:SS.
///
/// # Examples
/// ```
/// # use retroutils::time_utils::format_hhmmss;
/// assert_eq!(format_hhmmss(0), "00:00:00");
/// assert_eq!(format_hhmmss(61), "00:01:01");
/// assert_eq!(format_hhmmss(3661), "01:01:01");
/// ```
pub fn format_hhmmss(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Formats fractional seconds as HH:MM:SS, rounding to the nearest second.
///
/// Negative and non-finite inputs are formatted as zero.
pub fn format_hhmmss_f64(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return format_hhmmss(0);
    }
    format_hhmmss(seconds.round() as u64)
}

/// Returns `t + d`, saturating on overflow.
pub fn after(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    match TimeDelta::from_std(d) {
        Ok(delta) => t.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC),
        Err(_) => DateTime::<Utc>::MAX_UTC,
    }
}

/// Signed number of seconds from `from` to `to`, with millisecond precision.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Converts fractional seconds to a `Duration`, clamping negatives to zero.
pub fn secs_to_duration(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_hhmmss() {
        assert_eq!(format_hhmmss(0), "00:00:00");
        assert_eq!(format_hhmmss(59), "00:00:59");
        assert_eq!(format_hhmmss(3600), "01:00:00");
        assert_eq!(format_hhmmss(86399), "23:59:59");
    }

    #[test]
    fn test_format_hhmmss_f64() {
        assert_eq!(format_hhmmss_f64(123.4), "00:02:03");
        assert_eq!(format_hhmmss_f64(123.6), "00:02:04");
        assert_eq!(format_hhmmss_f64(-3.0), "00:00:00");
        assert_eq!(format_hhmmss_f64(f64::NAN), "00:00:00");
    }

    #[test]
    fn test_after_and_seconds_between() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t1 = after(t0, Duration::from_millis(2_500));
        assert_eq!(seconds_between(t0, t1), 2.5);
        assert_eq!(seconds_between(t1, t0), -2.5);
    }

    #[test]
    fn test_secs_to_duration() {
        assert_eq!(secs_to_duration(1.5), Duration::from_millis(1_500));
        assert_eq!(secs_to_duration(-1.0), Duration::ZERO);
    }
}
