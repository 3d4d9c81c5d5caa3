//! Human-readable time and offset formatting
//!
//! Display helpers for debug panels and diagnostics. Nothing here takes part
//! in calibration or resolution arithmetic.

/// Values at or above this magnitude are shown as `H:MM:SS`
const LONG_FORMAT_MIN: f64 = 100.0;

/// Format a UTC offset in minutes as `±HH:MM`
///
/// # Examples
///
/// ```
/// use edgeclock_common::human_time::format_offset;
///
/// assert_eq!(format_offset(0), "+00:00");
/// assert_eq!(format_offset(-300), "-05:00");
/// assert_eq!(format_offset(330), "+05:30");
/// assert_eq!(format_offset(-570), "-09:30");
/// ```
pub fn format_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let abs = minutes.unsigned_abs();
    format!("{}{:02}:{:02}", sign, abs / 60, abs % 60)
}

/// Format a signed number of seconds for diagnostics
///
/// Small magnitudes keep sub-second precision (`+2.50s`); larger ones use
/// `±H:MM:SS`. Non-finite values are shown as `n/a`.
///
/// # Examples
///
/// ```
/// use edgeclock_common::human_time::format_signed_secs;
///
/// assert_eq!(format_signed_secs(2.5), "+2.50s");
/// assert_eq!(format_signed_secs(-0.25), "-0.25s");
/// assert_eq!(format_signed_secs(3661.0), "+1:01:01");
/// assert_eq!(format_signed_secs(f64::NAN), "n/a");
/// ```
pub fn format_signed_secs(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "n/a".to_string();
    }

    let sign = if seconds < 0.0 { '-' } else { '+' };
    let abs = seconds.abs();

    if abs < LONG_FORMAT_MIN {
        format!("{}{:.2}s", sign, abs)
    } else {
        let total = abs.round() as u64;
        let hours = total / 3600;
        let mins = (total % 3600) / 60;
        let secs = total % 60;
        format!("{}{}:{:02}:{:02}", sign, hours, mins, secs)
    }
}

/// Format an optional offset, showing `uncalibrated` for `None`
pub fn format_offset_opt(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => format_signed_secs(s),
        None => "uncalibrated".to_string(),
    }
}
