//! Calibration state and the Edge-Snap estimator
//!
//! The calibration offset `C` maps the stream axis to epoch time:
//! `epoch ≈ stream_end + D + C`, where `D` is the buffered-vs-seekable
//! skew. One `CalibrationState` exists per stream attachment.
//!
//! `C` is written in exactly two ways:
//! - Edge-Snap overwrites it from the live edge ([`edge_snap`])
//! - the Live-PLL nudges it by a bounded delta (see `drift`)
//!
//! Neither is allowed while playback is locked.

use edgeclock_common::config::LockConfig;
use edgeclock_common::EngineConfig;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::error::{Error, Result, SuspendReason};
use crate::lock::PlaybackLockMachine;
use crate::stream::StreamWindowSnapshot;

/// Stream-axis to epoch offset
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Offset {
    #[default]
    Uncalibrated,
    Calibrated(f64),
}

impl Offset {
    pub fn value(&self) -> Option<f64> {
        match self {
            Offset::Uncalibrated => None,
            Offset::Calibrated(c) => Some(*c),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, Offset::Calibrated(_))
    }
}

/// Skew currently in effect
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Skew {
    /// No evidence; treated as 0
    None,
    /// Provisional estimate from lead samples, within its TTL
    Fallback(f64),
    /// Non-zero skew confirmed by an external source
    Confirmed(f64),
}

impl Skew {
    pub fn value(&self) -> f64 {
        match self {
            Skew::None => 0.0,
            Skew::Fallback(d) | Skew::Confirmed(d) => *d,
        }
    }
}

/// Time-boxed provisional skew
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SkewFallback {
    pub value: Option<f64>,
    /// Epoch milliseconds after which `value` is no longer used
    pub until_ms: i64,
}

/// Read-only calibration snapshot for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationSnapshot {
    #[serde(rename = "C")]
    pub c: Option<f64>,
    #[serde(rename = "D")]
    pub d: f64,
    pub locked: bool,
    #[serde(rename = "consecutiveErrorCount")]
    pub consecutive_error_count: u32,
}

/// Per-attachment calibration state
#[derive(Debug, Clone)]
pub struct CalibrationState {
    offset: Offset,
    skew: f64,
    pub(crate) fallback: SkewFallback,
    pub(crate) consecutive_error_count: u32,
    pub(crate) lead_samples: VecDeque<f64>,
    lock: PlaybackLockMachine,
    provisional: Option<f64>,
}

impl CalibrationState {
    pub fn new(lock_config: &LockConfig) -> Self {
        Self {
            offset: Offset::Uncalibrated,
            skew: 0.0,
            fallback: SkewFallback::default(),
            consecutive_error_count: 0,
            lead_samples: VecDeque::new(),
            lock: PlaybackLockMachine::new(lock_config),
            provisional: None,
        }
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Confirmed skew `D` (0 until confirmed)
    pub fn skew(&self) -> f64 {
        self.skew
    }

    pub fn fallback(&self) -> SkewFallback {
        self.fallback
    }

    pub fn lead_samples(&self) -> &VecDeque<f64> {
        &self.lead_samples
    }

    pub fn consecutive_error_count(&self) -> u32 {
        self.consecutive_error_count
    }

    pub fn lock(&self) -> &PlaybackLockMachine {
        &self.lock
    }

    pub fn lock_mut(&mut self) -> &mut PlaybackLockMachine {
        &mut self.lock
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Skew in effect at `now_ms`: confirmed `D` wins over an unexpired
    /// fallback, which wins over nothing.
    pub fn effective_skew(&self, now_ms: i64) -> Skew {
        if self.skew != 0.0 {
            return Skew::Confirmed(self.skew);
        }
        match self.fallback.value {
            Some(d) if now_ms < self.fallback.until_ms => Skew::Fallback(d),
            _ => Skew::None,
        }
    }

    /// Record a skew confirmed by an external source
    ///
    /// # Errors
    /// `Error::Suspended` while locked.
    pub fn confirm_skew(&mut self, d: f64) -> Result<()> {
        if self.is_locked() {
            return Err(Error::Suspended(SuspendReason::Locked));
        }
        if !d.is_finite() {
            return Err(Error::InvalidTarget(d));
        }
        self.skew = d;
        Ok(())
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            c: self.offset.value(),
            d: self.skew,
            locked: self.is_locked(),
            consecutive_error_count: self.consecutive_error_count,
        }
    }

    /// Overwrite `C`, returning the previous value
    pub(crate) fn snap_offset(&mut self, c: f64) -> Result<Option<f64>> {
        if self.is_locked() {
            return Err(Error::Suspended(SuspendReason::Locked));
        }
        let previous = self.offset.value();
        self.offset = Offset::Calibrated(c);
        self.consecutive_error_count = 0;
        Ok(previous)
    }

    /// Add a bounded delta to a calibrated `C`, returning the new value
    pub(crate) fn nudge_offset(&mut self, delta: f64) -> Result<f64> {
        if self.is_locked() {
            return Err(Error::Suspended(SuspendReason::Locked));
        }
        match self.offset {
            Offset::Uncalibrated => Err(Error::Uncalibrated),
            Offset::Calibrated(c) => {
                let next = c + delta;
                self.offset = Offset::Calibrated(next);
                Ok(next)
            }
        }
    }

    /// Session-pinned provisional offset, if one has been derived
    pub fn provisional_offset(&self) -> Option<f64> {
        self.provisional
    }

    /// Pin `candidate` as the provisional offset unless one is already
    /// pinned; returns the pinned value.
    pub(crate) fn pin_provisional(&mut self, candidate: f64) -> f64 {
        *self.provisional.get_or_insert(candidate)
    }

    /// Drop `C`, `D` and every estimator aid, keeping the lock state
    pub fn reset(&mut self) {
        self.offset = Offset::Uncalibrated;
        self.skew = 0.0;
        self.fallback = SkewFallback::default();
        self.consecutive_error_count = 0;
        self.lead_samples.clear();
        self.provisional = None;
    }
}

/// Live-edge reference used by Edge-Snap
///
/// Returns `(effective_end, used_buffered_end)`. The buffered end replaces
/// the seekable end when the latter is ahead by more than
/// `seekable_anomaly_sec`, which some backends do by roughly an hour.
pub fn effective_end(window: &StreamWindowSnapshot, anomaly_sec: f64) -> Option<(f64, bool)> {
    if !window.end.is_finite() {
        return None;
    }
    match window.buffered_end {
        Some(buffered) if buffered.is_finite() && window.end - buffered > anomaly_sec => {
            Some((buffered, true))
        }
        _ => Some((window.end, false)),
    }
}

/// Offset implied by treating the live edge as `now - latency`
///
/// Returns `(c, effective_end, used_buffered_end)`.
pub fn estimate_offset(
    window: &StreamWindowSnapshot,
    now_epoch: f64,
    config: &EngineConfig,
) -> Result<(f64, f64, bool)> {
    let (end, used_buffered) = effective_end(window, config.seekable_anomaly_sec)
        .ok_or_else(|| Error::RangeUnavailable("no finite live edge".to_string()))?;
    let c = (now_epoch - config.latency_sec) - end;
    Ok((c, end, used_buffered))
}

/// Outcome of one Edge-Snap
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnapReport {
    pub previous: Option<f64>,
    pub c: f64,
    pub effective_end: f64,
    pub used_buffered_end: bool,
}

/// Snap `C` to the live edge
///
/// # Errors
/// `Error::Suspended` while locked (state untouched) and
/// `Error::RangeUnavailable` when there is no finite live edge.
pub fn edge_snap(
    state: &mut CalibrationState,
    window: &StreamWindowSnapshot,
    now_epoch: f64,
    config: &EngineConfig,
) -> Result<SnapReport> {
    if state.is_locked() {
        return Err(Error::Suspended(SuspendReason::Locked));
    }
    let (c, effective_end, used_buffered_end) = estimate_offset(window, now_epoch, config)?;
    if used_buffered_end {
        warn!(
            "Seekable end {:.1} over-reports buffered end {:.1}, snapping to buffered",
            window.end, effective_end
        );
    }
    let previous = state.snap_offset(c)?;
    info!(
        c,
        previous = ?previous,
        effective_end,
        "Edge-Snap calibrated offset"
    );
    Ok(SnapReport {
        previous,
        c,
        effective_end,
        used_buffered_end,
    })
}
