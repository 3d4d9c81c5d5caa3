//! Stream attachment and timer ownership
//!
//! A [`Session`] holds at most one attached stream together with its
//! calibration state, and drives the synchronous core on tokio timers:
//!
//! - a Live-PLL interval (`pll.interval_ms`)
//! - an Edge-Snap probe interval (`probe_interval_ms`) that snaps once while
//!   uncalibrated and near the live edge
//! - one-shot lock releases scheduled by playback events
//! - one-shot resume rechecks after landing on the window end
//!
//! Every spawned task is registered in a timer set and aborted on
//! [`Session::detach`] or drop. Tasks also carry the attachment id they were
//! spawned for and do nothing once that attachment is gone.

use chrono::{DateTime, Utc};
use edgeclock_common::events::{DiagnosticEvent, PlaybackEvent};
use edgeclock_common::time::millis_to_duration;
use edgeclock_common::{EngineConfig, EventBus, WallClock};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calibration::{self, CalibrationSnapshot, CalibrationState, SnapReport};
use crate::drift::{DriftCorrector, SkewUpdate, TickOutcome};
use crate::error::{Error, Result};
use crate::jump::{self, JumpContext, JumpOptions, JumpOutcome};
use crate::lock::LockTransition;
use crate::seek::{self, SeekReport};
use crate::stream::{is_near_live_edge, StreamHandle, StreamWindowSnapshot};

/// External ad-detection signal
pub trait AdSignal: Send + Sync {
    fn is_ad_active(&self) -> bool;
}

impl<F> AdSignal for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_ad_active(&self) -> bool {
        self()
    }
}

/// Ad signal that never reports an ad
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAds;

impl AdSignal for NoAds {
    fn is_ad_active(&self) -> bool {
        false
    }
}

struct Attachment {
    id: Uuid,
    stream: Box<dyn StreamHandle>,
    state: CalibrationState,
}

#[derive(Default)]
struct TimerSet {
    handles: Vec<AbortHandle>,
}

impl TimerSet {
    fn push(&mut self, handle: AbortHandle) {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(handle);
    }

    fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Abort everything, returning how many timers were still pending
    fn cancel_all(&mut self) -> usize {
        let pending = self.pending();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        pending
    }
}

struct Shared {
    config: EngineConfig,
    corrector: DriftCorrector,
    clock: Arc<dyn WallClock>,
    ads: Arc<dyn AdSignal>,
    bus: EventBus,
    attachment: Mutex<Option<Attachment>>,
    timers: Mutex<TimerSet>,
}

impl Shared {
    fn attachment(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.attachment.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn timers(&self) -> MutexGuard<'_, TimerSet> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn emit_all(&self, events: Vec<DiagnosticEvent>) {
        for event in events {
            self.bus.emit_lossy(event);
        }
    }

    /// Spawn a timer task and register its abort handle
    fn spawn_timer<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.timers().push(handle.abort_handle());
    }

    fn seek_event(&self, id: Uuid, report: &SeekReport) -> DiagnosticEvent {
        DiagnosticEvent::SeekApplied {
            attachment_id: id,
            requested: report.requested,
            target: report.target,
            previous: report.previous,
            reason: report.reason,
            range_start: report.range.0,
            range_end: report.range.1,
            timestamp: self.now(),
        }
    }

    fn snap_event(&self, id: Uuid, report: &SnapReport, automatic: bool) -> DiagnosticEvent {
        DiagnosticEvent::EdgeSnapped {
            attachment_id: id,
            previous_c: report.previous,
            c: report.c,
            effective_end: report.effective_end,
            used_buffered_end: report.used_buffered_end,
            automatic,
            timestamp: self.now(),
        }
    }

    /// One Live-PLL tick; false when the attachment is gone
    fn drift_tick(&self, id: Uuid) -> bool {
        let mut events = Vec::new();
        {
            let mut guard = self.attachment();
            let Some(att) = guard.as_mut().filter(|a| a.id == id) else {
                return false;
            };
            let window = StreamWindowSnapshot::read(att.stream.as_ref());
            let tick = self.corrector.tick(
                &mut att.state,
                &window,
                self.clock.epoch_secs(),
                self.clock.epoch_ms(),
            );

            match tick.skew {
                SkewUpdate::Adopted { value, until_ms } => {
                    events.push(DiagnosticEvent::SkewFallbackAdopted {
                        attachment_id: id,
                        value,
                        until_ms,
                        timestamp: self.now(),
                    })
                }
                SkewUpdate::Cleared { superseded } => {
                    events.push(DiagnosticEvent::SkewFallbackCleared {
                        attachment_id: id,
                        superseded,
                        timestamp: self.now(),
                    })
                }
                SkewUpdate::Refreshed { .. } | SkewUpdate::Unchanged => {}
            }
            if let TickOutcome::Corrected { error, delta, c } = tick.outcome {
                events.push(DiagnosticEvent::DriftAdjusted {
                    attachment_id: id,
                    error_sec: error,
                    delta_sec: delta,
                    c,
                    timestamp: self.now(),
                });
            }
        }
        self.emit_all(events);
        true
    }

    /// One auto Edge-Snap probe; false when the attachment is gone
    fn probe_tick(&self, id: Uuid) -> bool {
        let event = {
            let mut guard = self.attachment();
            let Some(att) = guard.as_mut().filter(|a| a.id == id) else {
                return false;
            };
            if att.state.offset().is_calibrated()
                || att.state.is_locked()
                || !is_near_live_edge(att.stream.as_ref(), self.config.near_live_slack_sec)
            {
                return true;
            }
            let window = StreamWindowSnapshot::read(att.stream.as_ref());
            match calibration::edge_snap(
                &mut att.state,
                &window,
                self.clock.epoch_secs(),
                &self.config,
            ) {
                Ok(report) => self.snap_event(id, &report, true),
                Err(e) => {
                    debug!("Near-live probe could not snap: {}", e);
                    return true;
                }
            }
        };
        self.bus.emit_lossy(event);
        true
    }

    fn release_lock(&self, id: Uuid, generation: u64) {
        let mut guard = self.attachment();
        let Some(att) = guard.as_mut().filter(|a| a.id == id) else {
            return;
        };
        if att.state.lock_mut().release(generation) {
            drop(guard);
            debug!(generation, "Playback lock released");
            self.bus.emit_lossy(DiagnosticEvent::LockChanged {
                attachment_id: id,
                locked: false,
                generation,
                timestamp: self.now(),
            });
        }
    }

    fn recheck_resume(&self, id: Uuid) {
        let mut guard = self.attachment();
        if let Some(att) = guard.as_mut().filter(|a| a.id == id) {
            seek::resume_if_paused(att.stream.as_mut());
        }
    }
}

async fn drift_loop(shared: Weak<Shared>, id: Uuid, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else { break };
        if !shared.drift_tick(id) {
            break;
        }
    }
}

async fn probe_loop(shared: Weak<Shared>, id: Uuid, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else { break };
        if !shared.probe_tick(id) {
            break;
        }
    }
}

/// Calibration engine bound to at most one stream at a time
///
/// Timer-driven methods spawn tokio tasks and must be called from within a
/// runtime.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Build a session from a validated configuration
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn WallClock>,
        ads: Arc<dyn AdSignal>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                corrector: DriftCorrector::new(&config),
                config,
                clock,
                ads,
                bus: EventBus::default(),
                attachment: Mutex::new(None),
                timers: Mutex::new(TimerSet::default()),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Receive diagnostic events
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.shared.bus.subscribe()
    }

    pub fn is_attached(&self) -> bool {
        self.shared.attachment().is_some()
    }

    pub fn attachment_id(&self) -> Option<Uuid> {
        self.shared.attachment().as_ref().map(|a| a.id)
    }

    /// Number of timers that have not yet fired or finished
    pub fn pending_timers(&self) -> usize {
        self.shared.timers().pending()
    }

    /// Attach a stream with fresh calibration state
    ///
    /// Any previous attachment is detached first.
    pub fn attach<S>(&self, stream: S) -> Uuid
    where
        S: StreamHandle + 'static,
    {
        self.detach();

        let id = Uuid::new_v4();
        *self.shared.attachment() = Some(Attachment {
            id,
            stream: Box::new(stream),
            state: CalibrationState::new(&self.shared.config.lock),
        });
        info!(attachment_id = %id, "Stream attached");

        let weak = Arc::downgrade(&self.shared);
        self.shared.spawn_timer(drift_loop(
            weak.clone(),
            id,
            millis_to_duration(self.shared.config.pll.interval_ms),
        ));
        self.shared.spawn_timer(probe_loop(
            weak,
            id,
            millis_to_duration(self.shared.config.probe_interval_ms),
        ));

        self.shared.bus.emit_lossy(DiagnosticEvent::Attached {
            attachment_id: id,
            timestamp: self.shared.now(),
        });
        id
    }

    /// Detach the stream and cancel every timer
    ///
    /// Returns false when nothing was attached.
    pub fn detach(&self) -> bool {
        let Some(att) = self.shared.attachment().take() else {
            return false;
        };
        let timers_cancelled = self.shared.timers().cancel_all();
        info!(attachment_id = %att.id, timers_cancelled, "Stream detached");
        self.shared.bus.emit_lossy(DiagnosticEvent::Detached {
            attachment_id: att.id,
            timers_cancelled,
            timestamp: self.shared.now(),
        });
        true
    }

    /// Feed a playback event into the lock machine
    pub fn on_playback_event(&self, event: PlaybackEvent) -> Result<()> {
        let (id, transition, was_locked) = {
            let mut guard = self.shared.attachment();
            let att = guard.as_mut().ok_or(Error::Detached)?;
            let was_locked = att.state.is_locked();
            (att.id, att.state.lock_mut().on_event(event), was_locked)
        };
        debug!(event = %event, "Playback event");

        match transition {
            LockTransition::Locked { generation } => {
                if !was_locked {
                    self.shared.bus.emit_lossy(DiagnosticEvent::LockChanged {
                        attachment_id: id,
                        locked: true,
                        generation,
                        timestamp: self.shared.now(),
                    });
                }
            }
            LockTransition::ScheduleUnlock { generation, delay } => {
                let weak = Arc::downgrade(&self.shared);
                self.shared.spawn_timer(async move {
                    sleep(delay).await;
                    if let Some(shared) = weak.upgrade() {
                        shared.release_lock(id, generation);
                    }
                });
            }
        }
        Ok(())
    }

    fn schedule_resume_check(&self, id: Uuid) {
        let weak = Arc::downgrade(&self.shared);
        let delay = millis_to_duration(self.shared.config.end_recheck_ms);
        self.shared.spawn_timer(async move {
            sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.recheck_resume(id);
            }
        });
    }

    /// Resolve a local time in a zone and seek the attached stream there
    pub fn resolve_and_jump(&self, input: &str, zone_id: &str, options: JumpOptions) -> JumpOutcome {
        let ad_active = self.shared.ads.is_ad_active();
        let now = self.shared.now();

        let (id, outcome) = {
            let mut guard = self.shared.attachment();
            let Some(att) = guard.as_mut() else {
                warn!("Jump requested with no stream attached");
                return JumpOutcome::rejected(Error::Detached.reason_code());
            };
            let ctx = JumpContext {
                stream: att.stream.as_mut(),
                state: &mut att.state,
                config: &self.shared.config,
                now,
                ad_active,
            };
            (att.id, jump::resolve_and_jump(ctx, input, zone_id, options))
        };

        let mut events = Vec::new();
        if let Some(snap) = &outcome.snap {
            events.push(self.shared.snap_event(id, snap, true));
        }
        if let Some(report) = &outcome.clamp_info {
            events.push(self.shared.seek_event(id, report));
            if report.needs_resume_check {
                self.schedule_resume_check(id);
            }
        }
        events.push(DiagnosticEvent::JumpResolved {
            attachment_id: id,
            ok: outcome.ok,
            decision: outcome.decision,
            reason: outcome.reason.clone(),
            applied_target: outcome.applied_target,
            epoch: outcome.epoch(),
            ambiguous: outcome.ambiguous,
            gap: outcome.gap,
            provisional: outcome.provisional,
            timestamp: now,
        });
        self.shared.emit_all(events);
        outcome
    }

    /// Seek the attached stream to a stream-axis position
    pub fn seek(&self, target: f64) -> Result<SeekReport> {
        let (id, report) = {
            let mut guard = self.shared.attachment();
            let att = guard.as_mut().ok_or(Error::Detached)?;
            (att.id, seek::seek(att.stream.as_mut(), target, &self.shared.config)?)
        };
        if report.needs_resume_check {
            self.schedule_resume_check(id);
        }
        self.shared.bus.emit_lossy(self.shared.seek_event(id, &report));
        Ok(report)
    }

    /// Snap `C` to the live edge now ("is at edge")
    pub fn edge_snap(&self) -> Result<SnapReport> {
        let (id, report) = {
            let mut guard = self.shared.attachment();
            let att = guard.as_mut().ok_or(Error::Detached)?;
            let window = StreamWindowSnapshot::read(att.stream.as_ref());
            let report = calibration::edge_snap(
                &mut att.state,
                &window,
                self.shared.clock.epoch_secs(),
                &self.shared.config,
            )?;
            (att.id, report)
        };
        self.shared
            .bus
            .emit_lossy(self.shared.snap_event(id, &report, false));
        Ok(report)
    }

    /// Record a skew `D` confirmed by an external source
    pub fn confirm_skew(&self, d: f64) -> Result<()> {
        let mut guard = self.shared.attachment();
        let att = guard.as_mut().ok_or(Error::Detached)?;
        att.state.confirm_skew(d)?;
        info!(d, "Skew confirmed");
        Ok(())
    }

    /// Forget `C`, `D` and the provisional offset of the attached stream
    pub fn reset_calibration(&self) -> Result<()> {
        let mut guard = self.shared.attachment();
        let att = guard.as_mut().ok_or(Error::Detached)?;
        att.state.reset();
        info!(attachment_id = %att.id, "Calibration reset");
        Ok(())
    }

    /// Read-only calibration snapshot
    pub fn snapshot(&self) -> Result<CalibrationSnapshot> {
        let guard = self.shared.attachment();
        let att = guard.as_ref().ok_or(Error::Detached)?;
        Ok(att.state.snapshot())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.timers().cancel_all();
    }
}
