//! Live-PLL drift corrector
//!
//! Once Edge-Snap has established `C`, the offset should stay nearly static.
//! Each tick measures the residual between the predicted and the observed
//! live edge,
//!
//! ```text
//! e = (seekable_end + D_eff + C) - (now - latency)
//! ```
//!
//! and only after `consec_n` consecutive ticks past the hysteresis band
//! applies `-alpha * e`, clamped to `max_rate_per_sec * interval` per tick.
//! A single wild reading beyond the outlier threshold is discarded.
//!
//! The tick also maintains the skew fallback: while `D` is unconfirmed, a
//! seekable end persistently 3000-4200 s ahead of the buffered end is
//! treated as a reporting anomaly and compensated with `-median(leads)`.

use edgeclock_common::config::{PllConfig, SkewConfig};
use edgeclock_common::EngineConfig;
use tracing::{debug, info};

use crate::calibration::{CalibrationState, SkewFallback};
use crate::stream::StreamWindowSnapshot;

/// Why a tick did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Locked,
    Uncalibrated,
    NoLiveEdge,
}

/// Result of the error gates for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    /// `|e|` exceeded the outlier threshold; counter reset
    Outlier { error: f64 },
    /// `|e|` within hysteresis; counter reset
    WithinHysteresis { error: f64 },
    /// Past hysteresis but fewer than `consec_n` ticks in a row
    Accumulating { error: f64, count: u32 },
    /// A bounded correction was applied to `C`
    Corrected { error: f64, delta: f64, c: f64 },
}

/// Change to the skew fallback made during a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkewUpdate {
    Unchanged,
    /// A new (or different) fallback value was adopted
    Adopted { value: f64, until_ms: i64 },
    /// The existing value was re-adopted and its TTL extended
    Refreshed { until_ms: i64 },
    /// The fallback was dropped; `superseded` when a confirmed `D` replaced it
    Cleared { superseded: bool },
}

/// Everything one tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftTick {
    pub outcome: TickOutcome,
    pub skew: SkewUpdate,
}

impl DriftTick {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            outcome: TickOutcome::Skipped(reason),
            skew: SkewUpdate::Unchanged,
        }
    }
}

/// Bounded-rate offset corrector
#[derive(Debug, Clone)]
pub struct DriftCorrector {
    pll: PllConfig,
    skew: SkewConfig,
    latency_sec: f64,
}

impl DriftCorrector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pll: config.pll.clone(),
            skew: config.skew.clone(),
            latency_sec: config.latency_sec,
        }
    }

    /// Run one tick against a fresh window snapshot
    pub fn tick(
        &self,
        state: &mut CalibrationState,
        window: &StreamWindowSnapshot,
        now_epoch: f64,
        now_ms: i64,
    ) -> DriftTick {
        if state.is_locked() {
            return DriftTick::skipped(SkipReason::Locked);
        }
        let Some(c) = state.offset().value() else {
            return DriftTick::skipped(SkipReason::Uncalibrated);
        };
        if !window.end.is_finite() {
            return DriftTick::skipped(SkipReason::NoLiveEdge);
        }

        let skew = self.update_skew(state, window, now_ms);
        let d_eff = state.effective_skew(now_ms).value();

        let error = (window.end + d_eff + c) - (now_epoch - self.latency_sec);
        if !error.is_finite() {
            return DriftTick {
                outcome: TickOutcome::Skipped(SkipReason::NoLiveEdge),
                skew,
            };
        }

        let outcome = self.apply_error(state, c, error);
        DriftTick { outcome, skew }
    }

    fn apply_error(&self, state: &mut CalibrationState, c: f64, error: f64) -> TickOutcome {
        if error.abs() > self.pll.outlier_e_sec {
            debug!("PLL outlier e={:.3}s ignored", error);
            state.consecutive_error_count = 0;
            return TickOutcome::Outlier { error };
        }
        if error.abs() <= self.pll.hys_sec {
            state.consecutive_error_count = 0;
            return TickOutcome::WithinHysteresis { error };
        }

        state.consecutive_error_count += 1;
        let count = state.consecutive_error_count;
        if count < self.pll.consec_n {
            debug!("PLL e={:.3}s past hysteresis ({}/{})", error, count, self.pll.consec_n);
            return TickOutcome::Accumulating { error, count };
        }

        state.consecutive_error_count = 0;
        let target = c - self.pll.alpha * error;
        let max_step = self.pll.max_step_sec();
        let delta = (target - c).clamp(-max_step, max_step);
        match state.nudge_offset(delta) {
            Ok(next) => {
                info!(error, delta, c = next, "PLL corrected offset");
                TickOutcome::Corrected {
                    error,
                    delta,
                    c: next,
                }
            }
            // Lock and calibration were checked at the top of the tick
            Err(_) => TickOutcome::Skipped(SkipReason::Locked),
        }
    }

    fn update_skew(
        &self,
        state: &mut CalibrationState,
        window: &StreamWindowSnapshot,
        now_ms: i64,
    ) -> SkewUpdate {
        if state.skew() != 0.0 {
            let had_fallback = state.fallback.value.is_some();
            state.fallback = SkewFallback::default();
            state.lead_samples.clear();
            return if had_fallback {
                debug!("Confirmed skew supersedes fallback");
                SkewUpdate::Cleared { superseded: true }
            } else {
                SkewUpdate::Unchanged
            };
        }

        let mut update = SkewUpdate::Unchanged;
        if state.fallback.value.is_some() && now_ms >= state.fallback.until_ms {
            debug!("Skew fallback expired");
            state.fallback = SkewFallback::default();
            update = SkewUpdate::Cleared { superseded: false };
        }

        let lead = window.buffered_end.map(|b| window.end - b);
        match lead {
            Some(lead)
                if lead >= self.skew.lead_band_min_sec && lead <= self.skew.lead_band_max_sec =>
            {
                state.lead_samples.push_back(lead);
                while state.lead_samples.len() > self.skew.ring_len {
                    state.lead_samples.pop_front();
                }
            }
            _ => state.lead_samples.clear(),
        }

        if state.lead_samples.len() == self.skew.ring_len {
            let value = -median(state.lead_samples.iter().copied());
            let until_ms = now_ms + self.skew.fallback_ttl_ms;
            let previous = state.fallback.value;
            state.fallback = SkewFallback {
                value: Some(value),
                until_ms,
            };
            update = if previous == Some(value) {
                SkewUpdate::Refreshed { until_ms }
            } else {
                info!(value, "Adopted skew fallback");
                SkewUpdate::Adopted { value, until_ms }
            };
        }
        update
    }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}
