//! Seek guard: clamping into the safely playable window
//!
//! Live backends frequently refuse playback or stall when asked to land
//! exactly on the reported seekable end, and stall past the buffered frontier
//! even when it is nominally seekable. Every seek is therefore clamped twice:
//! against `[start, end - guard]`, then against `buffered_end - backoff`.

use edgeclock_common::events::ClampReason;
use edgeclock_common::EngineConfig;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::stream::{StreamHandle, StreamWindowSnapshot};

/// Result of clamping one position against a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Clamp {
    pub value: f64,
    pub reason: ClampReason,
    /// Playable window `[start, max_end]` the value was clamped against
    pub range: (f64, f64),
}

/// Clamp `target` into `[start, max(start, end - guard_sec)]`
///
/// The guarded end never crosses below `start`, so a window narrower than
/// the guard collapses onto its start.
pub fn clamp_to_playable(target: f64, start: f64, end: f64, guard_sec: f64) -> Clamp {
    let max_end = start.max(end - guard_sec);
    let (value, reason) = if target < start {
        (start, ClampReason::Start)
    } else if target > max_end {
        (max_end, ClampReason::End)
    } else {
        (target, ClampReason::Within)
    };
    Clamp {
        value,
        reason,
        range: (start, max_end),
    }
}

/// Full record of an applied seek
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekReport {
    /// Position actually applied
    pub target: f64,
    /// True when `target` differs from `requested`
    pub clamped: bool,
    pub reason: ClampReason,
    /// Playable window used for the clamp
    pub range: (f64, f64),
    /// Position asked for
    pub requested: f64,
    /// Position before the seek
    pub previous: f64,
    /// True when the backend's fast-seek path was used
    pub fast: bool,
    /// True when playback should be re-checked shortly after landing
    pub needs_resume_check: bool,
}

/// Seek with edge-landing safety margins
///
/// Landing on the window end resumes playback immediately and sets
/// `needs_resume_check` so the caller can verify again after
/// `end_recheck_ms`.
///
/// # Errors
/// `Error::InvalidTarget` for a non-finite target and
/// `Error::RangeUnavailable` when the window has no finite extents. In both
/// cases the stream is left untouched.
pub fn seek(stream: &mut dyn StreamHandle, requested: f64, config: &EngineConfig) -> Result<SeekReport> {
    if !requested.is_finite() {
        return Err(Error::InvalidTarget(requested));
    }

    let window = StreamWindowSnapshot::read(stream);
    if !window.is_usable() {
        return Err(Error::RangeUnavailable(format!(
            "seekable window [{}, {}]",
            window.start, window.end
        )));
    }

    let mut clamp = clamp_to_playable(requested, window.start, window.end, config.edge_slack_sec);

    if let Some(buffered_end) = window.buffered_end {
        let frontier = buffered_end - config.edge_backoff_sec;
        // A frontier behind the window start is stale buffer data
        if frontier >= window.start && clamp.value > frontier {
            debug!(
                "Seek target {:.3} past buffered frontier {:.3}, backing off",
                clamp.value, frontier
            );
            clamp.value = frontier;
            clamp.reason = ClampReason::End;
        }
    }

    let previous = stream.current_position();
    let fast = stream.fast_seek(clamp.value);
    if !fast {
        stream.set_position(clamp.value);
    }

    let at_end = clamp.reason == ClampReason::End;
    if at_end {
        stream.play();
    }

    let report = SeekReport {
        target: clamp.value,
        clamped: clamp.value != requested,
        reason: clamp.reason,
        range: clamp.range,
        requested,
        previous,
        fast,
        needs_resume_check: at_end,
    };
    info!(
        requested = report.requested,
        target = report.target,
        previous = report.previous,
        reason = %report.reason,
        "Seek applied"
    );
    Ok(report)
}

/// Resume playback if the backend paused after an edge landing
///
/// Returns true when playback had to be resumed.
pub fn resume_if_paused(stream: &mut dyn StreamHandle) -> bool {
    if stream.is_paused() {
        debug!("Stream paused at window edge, resuming");
        stream.play();
        true
    } else {
        false
    }
}
