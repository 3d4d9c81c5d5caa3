//! Local wall time to epoch resolution in IANA time zones
//!
//! A local date-time maps to zero, one or two instants depending on DST:
//! - zero (spring-forward gap): resolved as if the clock had run through
//!   the gap, i.e. interpreted with the offset in force before the transition
//! - two (fall-back overlap): the earlier instant is chosen
//! - one: used directly
//!
//! The `ambiguous` and `gap` flags of every resolution are kept so that a
//! jump outcome can report which rule applied.

use chrono::{
    DateTime, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::time_parser::{ParsedTime, WallTime};

/// Which calendar interpretation a candidate represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayLabel {
    Today,
    Yesterday,
    Tomorrow,
}

/// A local wall time resolved to one epoch second
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneResolution {
    /// Epoch second of the resolved instant
    pub epoch: i64,
    /// Two instants existed; the earlier was chosen
    pub ambiguous: bool,
    /// No instant existed; resolved past the gap
    pub gap: bool,
    /// Resolved instant rendered in the zone, for diagnostics
    pub wall_clock: String,
    /// Calendar date the wall time was interpreted on
    pub date: NaiveDate,
}

impl ZoneResolution {
    /// `HH:MM:SS` part of the resolved instant in the zone
    pub fn wall_time(&self) -> &str {
        self.wall_clock
            .split(' ')
            .nth(1)
            .unwrap_or(self.wall_clock.as_str())
    }
}

/// One entry of an epoch candidate set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochCandidate {
    pub label: DayLabel,
    #[serde(flatten)]
    pub resolution: ZoneResolution,
}

impl EpochCandidate {
    pub fn epoch(&self) -> i64 {
        self.resolution.epoch
    }
}

/// Look up an IANA zone identifier
pub fn parse_zone(zone_id: &str) -> Result<Tz> {
    zone_id
        .trim()
        .parse::<Tz>()
        .map_err(|_| Error::InvalidZone(zone_id.to_string()))
}

/// Calendar date "today" in the given zone
pub fn today_in_zone(zone: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&zone).date_naive()
}

/// Current UTC offset of the zone in minutes (display only)
pub fn current_offset_minutes(zone: Tz, now: DateTime<Utc>) -> i32 {
    zone.offset_from_utc_datetime(&now.naive_utc())
        .fix()
        .local_minus_utc()
        / 60
}

/// Resolve a wall time on a calendar date in a zone to an epoch second
///
/// # Errors
/// `Error::InvalidZone` when the wall time is not a valid clock reading or
/// the date is outside the representable range.
pub fn to_epoch_in_zone(zone: Tz, time: WallTime, date: NaiveDate) -> Result<ZoneResolution> {
    let naive = date
        .and_hms_opt(time.hh, time.mm, time.ss)
        .ok_or_else(|| Error::InvalidZone(format!("invalid wall time {} on {}", time, date)))?;

    let (instant, ambiguous, gap) = match zone.from_local_datetime(&naive) {
        LocalResult::Single(instant) => (instant, false, false),
        LocalResult::Ambiguous(a, b) => {
            let earlier = if a.timestamp() <= b.timestamp() { a } else { b };
            (earlier, true, false)
        }
        LocalResult::None => (resolve_through_gap(zone, naive)?, false, true),
    };

    let resolution = ZoneResolution {
        epoch: instant.timestamp(),
        ambiguous,
        gap,
        wall_clock: instant.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        date,
    };
    debug!(
        zone = %zone,
        requested = %naive,
        resolved = %resolution.wall_clock,
        ambiguous,
        gap,
        "Resolved local time"
    );
    Ok(resolution)
}

/// Interpret a nonexistent local time with the offset in force before the
/// transition, which lands the same distance past the end of the gap.
fn resolve_through_gap(zone: Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>> {
    let probe = naive
        .checked_sub_signed(Duration::days(1))
        .ok_or_else(|| Error::InvalidZone(format!("{} out of range", naive)))?;
    let before = zone.offset_from_utc_datetime(&probe).fix().local_minus_utc();
    let utc = naive
        .checked_sub_signed(Duration::seconds(i64::from(before)))
        .ok_or_else(|| Error::InvalidZone(format!("{} out of range", naive)))?;
    Ok(zone.from_utc_datetime(&utc))
}

/// Build the today/yesterday/tomorrow candidate set for a parsed time
///
/// "Today" is `base_date` shifted by the parsed day offset, so `24:10`
/// entered on the 5th means 00:10 on the 6th.
pub fn epoch_candidates(
    zone: Tz,
    parsed: &ParsedTime,
    base_date: NaiveDate,
) -> Result<Vec<EpochCandidate>> {
    let today = base_date
        .checked_add_days(Days::new(u64::from(parsed.day_offset)))
        .ok_or_else(|| Error::InvalidZone("date out of range".to_string()))?;

    let mut dates = vec![(DayLabel::Today, today)];
    if let Some(d) = today.checked_sub_days(Days::new(1)) {
        dates.push((DayLabel::Yesterday, d));
    }
    if let Some(d) = today.checked_add_days(Days::new(1)) {
        dates.push((DayLabel::Tomorrow, d));
    }

    dates
        .into_iter()
        .map(|(label, date)| {
            to_epoch_in_zone(zone, parsed.time, date)
                .map(|resolution| EpochCandidate { label, resolution })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_parser::parse_and_normalize_24h;

    fn ny() -> Tz {
        parse_zone("America/New_York").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_unknown_zone() {
        assert!(matches!(parse_zone("Mars/Olympus_Mons"), Err(Error::InvalidZone(_))));
        assert!(parse_zone("Europe/Berlin").is_ok());
        assert!(parse_zone("UTC").is_ok());
    }

    #[test]
    fn test_plain_resolution_in_utc() {
        let utc = parse_zone("UTC").unwrap();
        let r = to_epoch_in_zone(utc, WallTime::new(0, 1, 40), date(1970, 1, 1)).unwrap();
        assert_eq!(r.epoch, 100);
        assert!(!r.ambiguous);
        assert!(!r.gap);
    }

    #[test]
    fn test_spring_forward_gap_snaps_forward() {
        let r = to_epoch_in_zone(ny(), WallTime::new(2, 30, 0), date(2021, 3, 14)).unwrap();
        assert!(r.gap);
        assert!(!r.ambiguous);
        assert_eq!(r.wall_time(), "03:30:00");
        // 02:30 EST == 07:30 UTC
        let expected = Utc.with_ymd_and_hms(2021, 3, 14, 7, 30, 0).unwrap();
        assert_eq!(r.epoch, expected.timestamp());
    }

    #[test]
    fn test_fall_back_picks_earlier_instant() {
        let r = to_epoch_in_zone(ny(), WallTime::new(1, 30, 0), date(2021, 11, 7)).unwrap();
        assert!(r.ambiguous);
        assert!(!r.gap);
        // First 01:30 is EDT (UTC-4) -> 05:30 UTC; the second would be 06:30 UTC
        let earlier = Utc.with_ymd_and_hms(2021, 11, 7, 5, 30, 0).unwrap();
        assert_eq!(r.epoch, earlier.timestamp());
        assert_eq!(r.wall_time(), "01:30:00");
    }

    #[test]
    fn test_unambiguous_summer_time() {
        let r = to_epoch_in_zone(ny(), WallTime::new(14, 32, 0), date(2021, 7, 1)).unwrap();
        let expected = Utc.with_ymd_and_hms(2021, 7, 1, 18, 32, 0).unwrap();
        assert_eq!(r.epoch, expected.timestamp());
        assert!(r.wall_clock.ends_with("EDT"));
    }

    #[test]
    fn test_today_in_zone_crosses_date_line() {
        // 02:00 UTC on the 2nd is still the 1st in New York
        let now = Utc.with_ymd_and_hms(2021, 7, 2, 2, 0, 0).unwrap();
        assert_eq!(today_in_zone(ny(), now), date(2021, 7, 1));
        let tokyo = parse_zone("Asia/Tokyo").unwrap();
        assert_eq!(today_in_zone(tokyo, now), date(2021, 7, 2));
    }

    #[test]
    fn test_current_offset_minutes() {
        let winter = Utc.with_ymd_and_hms(2021, 1, 15, 12, 0, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2021, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(current_offset_minutes(ny(), winter), -300);
        assert_eq!(current_offset_minutes(ny(), summer), -240);
        let kolkata = parse_zone("Asia/Kolkata").unwrap();
        assert_eq!(current_offset_minutes(kolkata, winter), 330);
    }

    #[test]
    fn test_candidates_are_today_yesterday_tomorrow() {
        let parsed = parse_and_normalize_24h("12:00").unwrap();
        let utc = parse_zone("UTC").unwrap();
        let candidates = epoch_candidates(utc, &parsed, date(2021, 7, 1)).unwrap();

        let labels: Vec<DayLabel> = candidates.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec![DayLabel::Today, DayLabel::Yesterday, DayLabel::Tomorrow]);
        assert_eq!(candidates[1].epoch(), candidates[0].epoch() - 86_400);
        assert_eq!(candidates[2].epoch(), candidates[0].epoch() + 86_400);
    }

    #[test]
    fn test_candidates_apply_day_offset() {
        let parsed = parse_and_normalize_24h("24:10").unwrap();
        let utc = parse_zone("UTC").unwrap();
        let candidates = epoch_candidates(utc, &parsed, date(2021, 7, 1)).unwrap();
        assert_eq!(candidates[0].resolution.date, date(2021, 7, 2));
        assert_eq!(candidates[0].resolution.wall_time(), "00:10:00");
    }

    #[test]
    fn test_candidates_carry_dst_flags_per_day() {
        let parsed = parse_and_normalize_24h("2:30").unwrap();
        let candidates = epoch_candidates(ny(), &parsed, date(2021, 3, 14)).unwrap();
        assert!(candidates[0].resolution.gap);
        assert!(!candidates[1].resolution.gap);
        assert!(!candidates[2].resolution.gap);
    }
}
