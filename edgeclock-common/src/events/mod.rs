//! Diagnostic event types for edgeclock
//!
//! Provides the structured events published for every seek, jump and
//! calibration change, plus the `EventBus` that carries them to an external
//! logger or debug panel.

mod seek_types;

pub use seek_types::{ClampReason, JumpDecision, PlaybackEvent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Diagnostic events published by a stream attachment
///
/// Events are fire-and-forget: the engine never waits for, or depends on, a
/// consumer. Every event carries the attachment it originated from so that a
/// consumer observing several attachments can tell them apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DiagnosticEvent {
    /// A stream was attached and a fresh calibration state created
    Attached {
        attachment_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The stream was detached; all timers were cancelled
    Detached {
        attachment_id: Uuid,
        /// Number of pending timers aborted during teardown
        timers_cancelled: usize,
        timestamp: DateTime<Utc>,
    },

    /// A position change was applied to the stream
    SeekApplied {
        attachment_id: Uuid,
        /// Position asked for by the caller
        requested: f64,
        /// Position actually applied
        target: f64,
        /// Position before the seek
        previous: f64,
        reason: ClampReason,
        /// Playable window the request was clamped against
        range_start: f64,
        range_end: f64,
        timestamp: DateTime<Utc>,
    },

    /// A jump request finished (successfully or not)
    JumpResolved {
        attachment_id: Uuid,
        ok: bool,
        decision: JumpDecision,
        /// Failure or suspension reason code
        reason: Option<String>,
        applied_target: Option<f64>,
        /// Epoch second of the chosen candidate
        epoch: Option<i64>,
        ambiguous: bool,
        gap: bool,
        /// True when the provisional session-pinned offset was used
        provisional: bool,
        timestamp: DateTime<Utc>,
    },

    /// Edge-Snap overwrote the calibration offset
    EdgeSnapped {
        attachment_id: Uuid,
        previous_c: Option<f64>,
        c: f64,
        effective_end: f64,
        /// True when the buffered end replaced an over-reporting seekable end
        used_buffered_end: bool,
        /// True when triggered by the near-live probe rather than a caller
        automatic: bool,
        timestamp: DateTime<Utc>,
    },

    /// The Live-PLL applied a bounded correction to the offset
    DriftAdjusted {
        attachment_id: Uuid,
        error_sec: f64,
        delta_sec: f64,
        c: f64,
        timestamp: DateTime<Utc>,
    },

    /// A provisional skew estimate was adopted from lead samples
    SkewFallbackAdopted {
        attachment_id: Uuid,
        value: f64,
        until_ms: i64,
        timestamp: DateTime<Utc>,
    },

    /// A provisional skew estimate expired or was superseded
    SkewFallbackCleared {
        attachment_id: Uuid,
        /// True when a confirmed skew replaced it, false when the TTL lapsed
        superseded: bool,
        timestamp: DateTime<Utc>,
    },

    /// The playback lock changed state
    LockChanged {
        attachment_id: Uuid,
        locked: bool,
        generation: u64,
        timestamp: DateTime<Utc>,
    },
}

impl DiagnosticEvent {
    /// Attachment the event originated from
    pub fn attachment_id(&self) -> Uuid {
        match self {
            DiagnosticEvent::Attached { attachment_id, .. }
            | DiagnosticEvent::Detached { attachment_id, .. }
            | DiagnosticEvent::SeekApplied { attachment_id, .. }
            | DiagnosticEvent::JumpResolved { attachment_id, .. }
            | DiagnosticEvent::EdgeSnapped { attachment_id, .. }
            | DiagnosticEvent::DriftAdjusted { attachment_id, .. }
            | DiagnosticEvent::SkewFallbackAdopted { attachment_id, .. }
            | DiagnosticEvent::SkewFallbackCleared { attachment_id, .. }
            | DiagnosticEvent::LockChanged { attachment_id, .. } => *attachment_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Distribution bus for diagnostic events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers never block the engine)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use edgeclock_common::events::{DiagnosticEvent, EventBus};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(DiagnosticEvent::Attached {
///     attachment_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(DiagnosticEvent::Attached { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DiagnosticEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are
    /// dropped for lagging subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DiagnosticEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
