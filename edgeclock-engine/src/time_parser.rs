//! Free-form local time parsing
//!
//! Accepts `HH:mm`, `HH:mm:ss`, `HHmm`, `HHmmss` and a bare one- or
//! two-digit hour, then normalizes overflowing fields:
//! seconds carry into minutes, minutes into hours, and hours past 23 into a
//! day offset.
//!
//! ```
//! use edgeclock_engine::time_parser::parse_and_normalize_24h;
//!
//! let parsed = parse_and_normalize_24h("24:10").unwrap();
//! assert_eq!(parsed.normalized, "00:10:00");
//! assert!(parsed.overflow);
//! assert_eq!(parsed.day_offset, 1);
//! ```

use serde::Serialize;
use thiserror::Error;

/// Maximum number of colon-separated fields (`HH:mm:ss`)
const MAX_FIELDS: usize = 3;

/// Parse failure category
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeParseError {
    /// Nothing but whitespace was supplied
    #[error("empty input")]
    Empty,

    /// A character other than a digit or colon was found
    #[error("only digits and ':' are allowed")]
    NonDigit,

    /// More than three colon-separated fields
    #[error("too many ':'-separated fields")]
    FieldCount,

    /// A digit group had an unsupported length
    #[error("unsupported digit group length")]
    DigitLength,
}

impl TimeParseError {
    /// Kebab-case reason code
    pub fn code(&self) -> &'static str {
        match self {
            TimeParseError::Empty => "empty-input",
            TimeParseError::NonDigit => "non-digit",
            TimeParseError::FieldCount => "bad-field-count",
            TimeParseError::DigitLength => "bad-digit-length",
        }
    }
}

/// Hour/minute/second triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WallTime {
    pub hh: u32,
    pub mm: u32,
    pub ss: u32,
}

impl WallTime {
    pub fn new(hh: u32, mm: u32, ss: u32) -> Self {
        Self { hh, mm, ss }
    }
}

impl std::fmt::Display for WallTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hh, self.mm, self.ss)
    }
}

/// Successful parse result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTime {
    /// Fields exactly as typed
    pub raw: WallTime,
    /// Fields after carry and modulo-24 normalization
    pub time: WallTime,
    /// Canonical zero-padded `HH:mm:ss`
    pub normalized: String,
    /// True when the hour carried past midnight
    pub overflow: bool,
    /// Whole days carried out of the hour field
    pub day_offset: u32,
}

/// Parse free-form input and normalize it to a 24-hour wall time
///
/// # Errors
/// Returns the failure category; never panics on any input.
pub fn parse_and_normalize_24h(input: &str) -> Result<ParsedTime, TimeParseError> {
    let raw = parse_fields(input)?;
    Ok(normalize(raw))
}

fn parse_fields(input: &str) -> Result<WallTime, TimeParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(TimeParseError::Empty);
    }
    if !s.chars().all(|c| c.is_ascii_digit() || c == ':') {
        return Err(TimeParseError::NonDigit);
    }

    let mut fields = [0u32; MAX_FIELDS];

    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() > MAX_FIELDS {
            return Err(TimeParseError::FieldCount);
        }
        for (slot, part) in fields.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 {
                return Err(TimeParseError::DigitLength);
            }
            *slot = digits(part);
        }
    } else {
        match s.len() {
            1 | 2 => fields[0] = digits(s),
            4 => {
                fields[0] = digits(&s[0..2]);
                fields[1] = digits(&s[2..4]);
            }
            6 => {
                fields[0] = digits(&s[0..2]);
                fields[1] = digits(&s[2..4]);
                fields[2] = digits(&s[4..6]);
            }
            _ => return Err(TimeParseError::DigitLength),
        }
    }

    Ok(WallTime::new(fields[0], fields[1], fields[2]))
}

/// Groups are at most two ASCII digits, so this cannot overflow
fn digits(group: &str) -> u32 {
    group
        .bytes()
        .fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
}

fn normalize(raw: WallTime) -> ParsedTime {
    let mut ss = raw.ss;
    let mut mm = raw.mm;
    let mut hh = raw.hh;

    mm += ss / 60;
    ss %= 60;
    hh += mm / 60;
    mm %= 60;

    let day_offset = hh / 24;
    hh %= 24;

    let time = WallTime::new(hh, mm, ss);
    ParsedTime {
        raw,
        time,
        normalized: time.to_string(),
        overflow: day_offset > 0,
        day_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_fields_are_zero_padded() {
        let parsed = parse_and_normalize_24h("7:5").unwrap();
        assert_eq!(parsed.normalized, "07:05:00");
        assert!(!parsed.overflow);
        assert_eq!(parsed.day_offset, 0);
    }

    #[test]
    fn test_minutes_carry_into_hours() {
        let parsed = parse_and_normalize_24h("08:80").unwrap();
        assert_eq!(parsed.normalized, "09:20:00");
        assert_eq!(parsed.raw, WallTime::new(8, 80, 0));
        assert!(!parsed.overflow);
    }

    #[test]
    fn test_hour_overflow_sets_day_offset() {
        let parsed = parse_and_normalize_24h("24:10").unwrap();
        assert_eq!(parsed.normalized, "00:10:00");
        assert!(parsed.overflow);
        assert_eq!(parsed.day_offset, 1);
    }

    #[test]
    fn test_cascading_carry_from_compact_form() {
        let parsed = parse_and_normalize_24h("236059").unwrap();
        assert_eq!(parsed.normalized, "00:00:59");
        assert!(parsed.overflow);
        assert_eq!(parsed.day_offset, 1);
    }

    #[test]
    fn test_seconds_carry() {
        let parsed = parse_and_normalize_24h("10:59:75").unwrap();
        assert_eq!(parsed.normalized, "11:00:15");
    }

    #[test]
    fn test_multi_day_overflow() {
        let parsed = parse_and_normalize_24h("99:99:99").unwrap();
        // 99s -> 1m39s, 100m -> 1h40m, 100h -> 4d 4h
        assert_eq!(parsed.normalized, "04:40:39");
        assert_eq!(parsed.day_offset, 4);
    }

    #[test]
    fn test_accepted_grammars() {
        assert_eq!(parse_and_normalize_24h("9").unwrap().normalized, "09:00:00");
        assert_eq!(parse_and_normalize_24h("14").unwrap().normalized, "14:00:00");
        assert_eq!(parse_and_normalize_24h("1432").unwrap().normalized, "14:32:00");
        assert_eq!(parse_and_normalize_24h("143205").unwrap().normalized, "14:32:05");
        assert_eq!(parse_and_normalize_24h("14:32").unwrap().normalized, "14:32:00");
        assert_eq!(parse_and_normalize_24h("14:32:05").unwrap().normalized, "14:32:05");
        assert_eq!(parse_and_normalize_24h("  14:32  ").unwrap().normalized, "14:32:00");
    }

    #[test]
    fn test_rejections() {
        assert_eq!(parse_and_normalize_24h(""), Err(TimeParseError::Empty));
        assert_eq!(parse_and_normalize_24h("   "), Err(TimeParseError::Empty));
        assert_eq!(parse_and_normalize_24h("12h30"), Err(TimeParseError::NonDigit));
        assert_eq!(parse_and_normalize_24h("-1:00"), Err(TimeParseError::NonDigit));
        assert_eq!(parse_and_normalize_24h("1:2:3:4"), Err(TimeParseError::FieldCount));
        assert_eq!(parse_and_normalize_24h("123"), Err(TimeParseError::DigitLength));
        assert_eq!(parse_and_normalize_24h("12345"), Err(TimeParseError::DigitLength));
        assert_eq!(parse_and_normalize_24h("1234567"), Err(TimeParseError::DigitLength));
        assert_eq!(parse_and_normalize_24h("123:00"), Err(TimeParseError::DigitLength));
        assert_eq!(parse_and_normalize_24h("12:"), Err(TimeParseError::DigitLength));
        assert_eq!(parse_and_normalize_24h(":30"), Err(TimeParseError::DigitLength));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let inputs = [
            "0", "7", "23", "24", "99", "7:5", "08:80", "24:10", "23:59:59", "236059", "0000",
            "1260", "995999", "12:34:56", "00:00:60", "47:59:59",
        ];
        for input in inputs {
            let first = parse_and_normalize_24h(input).unwrap();
            let second = parse_and_normalize_24h(&first.normalized).unwrap();
            assert_eq!(first.normalized, second.normalized, "input {input}");
            assert!(!second.overflow, "input {input}");
            assert_eq!(second.time, first.time, "input {input}");
        }
    }

    #[test]
    fn test_normalized_fields_in_range_for_all_two_digit_fields() {
        for hh in 0..100 {
            for mm in (0..100).step_by(7) {
                let input = format!("{:02}:{:02}:59", hh, mm);
                let parsed = parse_and_normalize_24h(&input).unwrap();
                assert!(parsed.time.hh < 24);
                assert!(parsed.time.mm < 60);
                assert!(parsed.time.ss < 60);
                let total_raw = hh * 3600 + mm * 60 + 59;
                let total_norm = parsed.day_offset * 86_400
                    + parsed.time.hh * 3600
                    + parsed.time.mm * 60
                    + parsed.time.ss;
                assert_eq!(total_raw, total_norm, "input {input}");
            }
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(TimeParseError::Empty.code(), "empty-input");
        assert_eq!(TimeParseError::NonDigit.code(), "non-digit");
        assert_eq!(TimeParseError::FieldCount.code(), "bad-field-count");
        assert_eq!(TimeParseError::DigitLength.code(), "bad-digit-length");
    }
}
