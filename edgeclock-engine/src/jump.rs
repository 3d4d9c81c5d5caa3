//! Jump resolution: local wall time to stream position
//!
//! Pipeline: parse the input, expand it into today/yesterday/tomorrow epoch
//! candidates in the requested zone, choose one against the playable window
//! and hand the stream-axis target to the seek guard.
//!
//! With a calibrated offset `C` a candidate epoch maps to `t = epoch - C`.
//! Without one, a provisional offset derived from the live edge is pinned for
//! the rest of the attachment so that repeated jumps share one reference.

use chrono::{DateTime, NaiveDate, Utc};
use edgeclock_common::events::JumpDecision;
use edgeclock_common::EngineConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calibration::{edge_snap, estimate_offset, CalibrationState, SnapReport};
use crate::error::{Error, Result, SuspendReason};
use crate::seek::{clamp_to_playable, seek, SeekReport};
use crate::stream::{is_near_live_edge, StreamHandle, StreamWindowSnapshot};
use crate::time_parser::parse_and_normalize_24h;
use crate::zone::{epoch_candidates, parse_zone, today_in_zone, EpochCandidate};

/// Optional overrides for a jump request
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JumpOptions {
    /// Calendar date used as "today" instead of the zone's current date
    pub date: Option<NaiveDate>,
    /// Offset used instead of the calibrated (or provisional) one
    pub offset_override: Option<f64>,
}

/// Result of one jump request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpOutcome {
    pub ok: bool,
    pub decision: JumpDecision,
    /// Stream position actually applied
    pub applied_target: Option<f64>,
    /// Reason code when `ok` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Canonical `HH:MM:SS` form of the input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    /// Candidate that was chosen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<EpochCandidate>,
    pub ambiguous: bool,
    pub gap: bool,
    /// True when the session-pinned provisional offset was used
    pub provisional: bool,
    /// Offset used to map the candidate onto the stream axis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clamp_info: Option<SeekReport>,
    /// Edge-Snap performed on the way, if any
    #[serde(skip)]
    pub snap: Option<SnapReport>,
}

impl JumpOutcome {
    /// Not-ok outcome carrying a reason code
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            decision: JumpDecision::ParseError,
            applied_target: None,
            reason: Some(reason.into()),
            normalized: None,
            candidate: None,
            ambiguous: false,
            gap: false,
            provisional: false,
            offset: None,
            clamp_info: None,
            snap: None,
        }
    }

    /// Epoch second of the chosen candidate
    pub fn epoch(&self) -> Option<i64> {
        self.candidate.as_ref().map(EpochCandidate::epoch)
    }
}

impl From<&Error> for JumpOutcome {
    fn from(err: &Error) -> Self {
        Self::rejected(err.reason_code())
    }
}

/// Distance from `value` to the closed interval `[lo, hi]`
fn distance_to_window(value: f64, lo: f64, hi: f64) -> f64 {
    if value < lo {
        lo - value
    } else if value > hi {
        value - hi
    } else {
        0.0
    }
}

/// Index of the first minimum, ignoring non-finite keys
fn first_min_by_key<I>(items: I) -> Option<usize>
where
    I: Iterator<Item = (usize, f64)>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, key) in items {
        if !key.is_finite() {
            continue;
        }
        match best {
            Some((_, k)) if key >= k => {}
            _ => best = Some((i, key)),
        }
    }
    best.map(|(i, _)| i)
}

/// Choose a candidate with a known offset
///
/// Returns the index of the first candidate whose position `epoch - c` lies
/// in the playable window, or failing that the one closest to it by edge
/// distance.
pub fn select_calibrated(
    candidates: &[EpochCandidate],
    c: f64,
    window: &StreamWindowSnapshot,
    guard_sec: f64,
) -> Option<usize> {
    let (lo, hi) = clamp_to_playable(window.start, window.start, window.end, guard_sec).range;
    let positions: Vec<f64> = candidates.iter().map(|k| k.epoch() as f64 - c).collect();

    if let Some(i) = positions.iter().position(|t| *t >= lo && *t <= hi) {
        return Some(i);
    }
    first_min_by_key(
        positions
            .iter()
            .enumerate()
            .map(|(i, t)| (i, distance_to_window(*t, lo, hi))),
    )
}

/// Choose a candidate with no calibrated offset
///
/// The provisional window ends at `now - latency` (less the guard band) and
/// is as wide as the seekable window. Inside it the candidate closest to
/// now wins; otherwise the one closest to the window.
pub fn select_provisional(
    candidates: &[EpochCandidate],
    now_epoch: f64,
    window: &StreamWindowSnapshot,
    config: &EngineConfig,
) -> Option<usize> {
    let right = now_epoch - config.latency_sec;
    let lo = right - window.width();
    let hi = lo.max(right - config.edge_slack_sec);
    let epochs: Vec<f64> = candidates.iter().map(|k| k.epoch() as f64).collect();

    let inside = first_min_by_key(
        epochs
            .iter()
            .enumerate()
            .filter(|(_, e)| **e >= lo && **e <= hi)
            .map(|(i, e)| (i, (e - now_epoch).abs())),
    );
    inside.or_else(|| {
        first_min_by_key(
            epochs
                .iter()
                .enumerate()
                .map(|(i, e)| (i, distance_to_window(*e, lo, hi))),
        )
    })
}

/// Everything a jump needs from one attachment
pub struct JumpContext<'a> {
    pub stream: &'a mut dyn StreamHandle,
    pub state: &'a mut CalibrationState,
    pub config: &'a EngineConfig,
    pub now: DateTime<Utc>,
    /// Snapshot of the external ad-detection signal
    pub ad_active: bool,
}

/// Resolve a local time in a zone and seek the stream there
///
/// Never fails: every error becomes a not-ok outcome with a reason code.
pub fn resolve_and_jump(
    ctx: JumpContext<'_>,
    input: &str,
    zone_id: &str,
    options: JumpOptions,
) -> JumpOutcome {
    if ctx.ad_active {
        warn!("Jump to {:?} refused: ad break in progress", input);
        return JumpOutcome::from(&Error::Suspended(SuspendReason::AdActive));
    }

    match try_jump(ctx, input, zone_id, options) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Jump to {:?} in {} failed: {}", input, zone_id, e);
            JumpOutcome::from(&e)
        }
    }
}

fn try_jump(
    ctx: JumpContext<'_>,
    input: &str,
    zone_id: &str,
    options: JumpOptions,
) -> Result<JumpOutcome> {
    let JumpContext {
        stream,
        state,
        config,
        now,
        ..
    } = ctx;

    let parsed = parse_and_normalize_24h(input)?;
    let zone = parse_zone(zone_id)?;
    let base_date = options.date.unwrap_or_else(|| today_in_zone(zone, now));
    let candidates = epoch_candidates(zone, &parsed, base_date)?;
    if candidates.is_empty() {
        return Ok(JumpOutcome::rejected("no-candidates"));
    }

    let now_epoch = now.timestamp_millis() as f64 / 1000.0;
    let mut window = StreamWindowSnapshot::read(&*stream);
    let mut snap = None;

    if options.offset_override.is_none()
        && !state.offset().is_calibrated()
        && !state.is_locked()
        && is_near_live_edge(&*stream, config.near_live_slack_sec)
    {
        match edge_snap(state, &window, now_epoch, config) {
            Ok(report) => {
                snap = Some(report);
                window = StreamWindowSnapshot::read(&*stream);
            }
            Err(e) => debug!("Edge-Snap before jump skipped: {}", e),
        }
    }

    if !window.is_usable() {
        return Err(Error::RangeUnavailable(format!(
            "seekable window [{}, {}]",
            window.start, window.end
        )));
    }

    let (index, offset, provisional) =
        match options.offset_override.or_else(|| state.offset().value()) {
            Some(c) => {
                let index = select_calibrated(&candidates, c, &window, config.edge_slack_sec);
                (index, c, false)
            }
            None => {
                let (estimate, _, _) = estimate_offset(&window, now_epoch, config)?;
                let pinned = state.pin_provisional(estimate);
                let index = select_provisional(&candidates, now_epoch, &window, config);
                (index, pinned, true)
            }
        };

    let Some(index) = index else {
        return Ok(JumpOutcome::rejected("no-candidates"));
    };
    let candidate = candidates[index].clone();
    let position = candidate.epoch() as f64 - offset;
    debug!(
        label = ?candidate.label,
        epoch = candidate.epoch(),
        offset,
        provisional,
        position,
        "Selected jump candidate"
    );

    let report = seek(stream, position, config)?;
    let decision = JumpDecision::from(report.reason);
    info!(
        input,
        zone = zone_id,
        normalized = %parsed.normalized,
        decision = %decision,
        target = report.target,
        "Jump resolved"
    );

    Ok(JumpOutcome {
        ok: true,
        decision,
        applied_target: Some(report.target),
        reason: None,
        normalized: Some(parsed.normalized),
        ambiguous: candidate.resolution.ambiguous,
        gap: candidate.resolution.gap,
        candidate: Some(candidate),
        provisional,
        offset: Some(offset),
        clamp_info: Some(report),
        snap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Offset;
    use crate::stream::MemoryStream;
    use crate::zone::{to_epoch_in_zone, DayLabel, ZoneResolution};
    use crate::time_parser::WallTime;
    use chrono::TimeZone;
    use edgeclock_common::config::LockConfig;
    use edgeclock_common::events::PlaybackEvent;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(epoch: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(epoch, 0).unwrap()
    }

    fn candidate(epoch: i64) -> EpochCandidate {
        EpochCandidate {
            label: DayLabel::Today,
            resolution: ZoneResolution {
                epoch,
                ambiguous: false,
                gap: false,
                wall_clock: String::new(),
                date: date(1970, 1, 1),
            },
        }
    }

    fn window(start: f64, end: f64) -> StreamWindowSnapshot {
        StreamWindowSnapshot {
            start,
            end,
            buffered_end: None,
        }
    }

    fn jump(
        stream: &MemoryStream,
        state: &mut CalibrationState,
        now: DateTime<Utc>,
        input: &str,
        zone: &str,
        options: JumpOptions,
    ) -> JumpOutcome {
        let config = EngineConfig::default();
        let mut handle = stream.clone();
        let ctx = JumpContext {
            stream: &mut handle,
            state,
            config: &config,
            now,
            ad_active: false,
        };
        resolve_and_jump(ctx, input, zone, options)
    }

    fn new_state() -> CalibrationState {
        CalibrationState::new(&LockConfig::default())
    }

    fn epoch_1970(offset: f64) -> JumpOptions {
        JumpOptions {
            date: Some(date(1970, 1, 1)),
            offset_override: Some(offset),
        }
    }

    #[test]
    fn test_select_calibrated_prefers_first_in_window() {
        let ks = [candidate(50), candidate(150), candidate(180)];
        assert_eq!(select_calibrated(&ks, 0.0, &window(100.0, 200.0), 3.0), Some(1));
    }

    #[test]
    fn test_select_calibrated_falls_back_to_nearest_edge() {
        let ks = [candidate(-500), candidate(260), candidate(10)];
        // Distances to [100, 197]: 600, 63, 90
        assert_eq!(select_calibrated(&ks, 0.0, &window(100.0, 200.0), 3.0), Some(1));
        assert_eq!(select_calibrated(&[], 0.0, &window(100.0, 200.0), 3.0), None);
    }

    #[test]
    fn test_select_provisional_prefers_closest_to_now() {
        let config = EngineConfig::default();
        let now = 100_000.0;
        // Provisional window [94_980, 99_977]
        let ks = [candidate(95_000), candidate(99_000), candidate(186_400)];
        assert_eq!(select_provisional(&ks, now, &window(0.0, 5_000.0), &config), Some(1));

        let outside = [candidate(13_600), candidate(100_000)];
        assert_eq!(select_provisional(&outside, now, &window(0.0, 5_000.0), &config), Some(1));
    }

    #[test]
    fn test_seek_in_range_scenario() {
        let stream = MemoryStream::live(0.0, 10_000.0);
        let mut state = new_state();
        let outcome = jump(&stream, &mut state, at(0), "00:01:40", "UTC", epoch_1970(0.0));

        assert!(outcome.ok);
        assert_eq!(outcome.decision, JumpDecision::SeekInRange);
        assert_eq!(outcome.applied_target, Some(100.0));
        assert_eq!(outcome.epoch(), Some(100));
        assert_eq!(stream.position(), 100.0);
    }

    #[test]
    fn test_jump_start_scenario() {
        let stream = MemoryStream::live(100.0, 200.0);
        let mut state = new_state();
        // epoch 100 - C 150 => stream time -50
        let outcome = jump(&stream, &mut state, at(0), "00:01:40", "UTC", epoch_1970(150.0));

        assert!(outcome.ok);
        assert_eq!(outcome.decision, JumpDecision::JumpStart);
        assert_eq!(outcome.applied_target, Some(100.0));
        assert_eq!(outcome.clamp_info.map(|r| r.requested), Some(-50.0));
    }

    #[test]
    fn test_jump_end_scenario() {
        let stream = MemoryStream::live(0.0, 200.0);
        let mut state = new_state();
        // epoch 100 - C (-9900) => stream time 10000
        let outcome = jump(&stream, &mut state, at(0), "00:01:40", "UTC", epoch_1970(-9_900.0));

        assert!(outcome.ok);
        assert_eq!(outcome.decision, JumpDecision::JumpEnd);
        assert_eq!(outcome.applied_target, Some(197.0));
        assert_eq!(stream.play_calls(), 1);
    }

    #[test]
    fn test_ad_active_short_circuits() {
        let stream = MemoryStream::live(0.0, 1_000.0).with_position(998.0);
        let mut state = new_state();
        let config = EngineConfig::default();
        let mut handle = stream.clone();
        let ctx = JumpContext {
            stream: &mut handle,
            state: &mut state,
            config: &config,
            now: at(1_000_000),
            ad_active: true,
        };
        let outcome = resolve_and_jump(ctx, "12:00", "UTC", JumpOptions::default());

        assert!(!outcome.ok);
        assert_eq!(outcome.decision, JumpDecision::ParseError);
        assert_eq!(outcome.reason.as_deref(), Some("ad-active"));
        assert!(stream.seek_log().is_empty());
        // Near the live edge, yet no Edge-Snap happened
        assert_eq!(state.offset(), Offset::Uncalibrated);
    }

    #[test]
    fn test_parse_and_zone_errors_are_outcomes() {
        let stream = MemoryStream::live(0.0, 1_000.0);
        let mut state = new_state();

        let outcome = jump(&stream, &mut state, at(0), "12:3a", "UTC", JumpOptions::default());
        assert_eq!(outcome.decision, JumpDecision::ParseError);
        assert_eq!(outcome.reason.as_deref(), Some("non-digit"));

        let outcome = jump(&stream, &mut state, at(0), "", "UTC", JumpOptions::default());
        assert_eq!(outcome.reason.as_deref(), Some("empty-input"));

        let outcome = jump(&stream, &mut state, at(0), "12:00", "Nowhere/Land", JumpOptions::default());
        assert_eq!(outcome.reason.as_deref(), Some("invalid-zone"));
        assert!(stream.seek_log().is_empty());
    }

    #[test]
    fn test_unusable_window_is_range_unavailable() {
        let stream = MemoryStream::live(0.0, 0.0).with_seekable(vec![]);
        let mut state = new_state();
        let outcome = jump(&stream, &mut state, at(0), "00:01:40", "UTC", epoch_1970(0.0));
        assert!(!outcome.ok);
        assert_eq!(outcome.reason.as_deref(), Some("range-unavailable"));
    }

    #[test]
    fn test_provisional_offset_is_pinned_across_jumps() {
        // now = 1970-01-12 13:46:40 UTC
        let now = at(1_000_000);
        let stream = MemoryStream::live(0.0, 5_000.0);
        let mut state = new_state();

        let first = jump(&stream, &mut state, now, "13:30", "UTC", JumpOptions::default());
        assert!(first.ok);
        assert!(first.provisional);
        // C_temp = (1_000_000 - 20) - 5000
        assert_eq!(first.offset, Some(994_980.0));
        assert_eq!(first.epoch(), Some(999_000));
        assert_eq!(first.applied_target, Some(4_020.0));
        assert_eq!(state.offset(), Offset::Uncalibrated);

        // A fresh estimate would now be 994_880; the pinned reference holds
        stream.advance(100.0);
        let second = jump(&stream, &mut state, now, "13:30", "UTC", JumpOptions::default());
        assert_eq!(second.offset, Some(994_980.0));
        assert_eq!(second.applied_target, Some(4_020.0));
    }

    #[test]
    fn test_near_live_edge_snaps_before_jumping() {
        let now = at(1_000_000);
        let stream = MemoryStream::live(0.0, 5_000.0).with_position(4_998.0);
        let mut state = new_state();

        let outcome = jump(&stream, &mut state, now, "13:30", "UTC", JumpOptions::default());
        assert!(outcome.ok);
        assert!(!outcome.provisional);
        assert!(outcome.snap.is_some());
        assert_eq!(state.offset(), Offset::Calibrated(994_980.0));
        assert_eq!(outcome.applied_target, Some(4_020.0));
    }

    #[test]
    fn test_locked_playback_skips_snap_but_still_jumps() {
        let now = at(1_000_000);
        let stream = MemoryStream::live(0.0, 5_000.0).with_position(4_998.0);
        let mut state = new_state();
        state.lock_mut().on_event(PlaybackEvent::Waiting);

        let outcome = jump(&stream, &mut state, now, "13:30", "UTC", JumpOptions::default());
        assert!(outcome.ok);
        assert!(outcome.provisional);
        assert!(outcome.snap.is_none());
        assert_eq!(state.offset(), Offset::Uncalibrated);
    }

    #[test]
    fn test_outcome_reports_dst_gap() {
        let ny: chrono_tz::Tz = "America/New_York".parse().unwrap();
        let today = to_epoch_in_zone(ny, WallTime::new(2, 30, 0), date(2021, 3, 14)).unwrap();
        let stream = MemoryStream::live(0.0, 10_000.0);
        let mut state = new_state();
        let options = JumpOptions {
            date: Some(date(2021, 3, 14)),
            offset_override: Some(today.epoch as f64 - 100.0),
        };
        let outcome = jump(&stream, &mut state, at(0), "2:30", "America/New_York", options);

        assert!(outcome.ok);
        assert!(outcome.gap);
        assert!(!outcome.ambiguous);
        assert_eq!(outcome.applied_target, Some(100.0));
    }

    #[test]
    fn test_outcome_json_shape() {
        let stream = MemoryStream::live(0.0, 10_000.0);
        let mut state = new_state();
        let outcome = jump(&stream, &mut state, at(0), "00:01:40", "UTC", epoch_1970(0.0));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["decision"], "seek-in-range");
        assert_eq!(json["appliedTarget"], 100.0);
        assert_eq!(json["clampInfo"]["reason"], "within");

        let rejected = serde_json::to_value(JumpOutcome::rejected("ad-active")).unwrap();
        assert_eq!(rejected["decision"], "parse-error");
        assert_eq!(rejected["reason"], "ad-active");
    }
}
