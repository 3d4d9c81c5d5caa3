//! Stream handle contract and window extents
//!
//! The engine never talks to a concrete player. It consumes a
//! [`StreamHandle`], reads its seekable and buffered ranges, and derives a
//! [`StreamWindowSnapshot`] each time it needs one. Ranges are not assumed
//! to be ordered or contiguous, and read failures degrade to "no data".

use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

/// Half-open interval on the stream's native time axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    fn is_finite(&self) -> bool {
        self.start.is_finite() && self.end.is_finite()
    }
}

/// A player backend refused or failed a range read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("range read failed: {0}")]
pub struct RangeReadError(pub String);

/// Contract a playable live stream must satisfy
pub trait StreamHandle: Send {
    /// Current playback position on the stream axis
    fn current_position(&self) -> f64;

    /// Move playback to `position`
    fn set_position(&mut self, position: f64);

    /// Move playback with a fast (keyframe) seek if the backend has one
    ///
    /// Returns false when unsupported; the caller then uses `set_position`.
    fn fast_seek(&mut self, _position: f64) -> bool {
        false
    }

    /// Seekable ranges as reported by the backend
    fn seekable_ranges(&self) -> Result<Vec<TimeRange>, RangeReadError>;

    /// Buffered ranges as reported by the backend
    fn buffered_ranges(&self) -> Result<Vec<TimeRange>, RangeReadError>;

    /// Reported duration (often infinite for live streams)
    fn duration(&self) -> f64;

    /// Whether playback is paused
    fn is_paused(&self) -> bool;

    /// Resume playback
    fn play(&mut self);
}

fn read_ranges(result: Result<Vec<TimeRange>, RangeReadError>, what: &str) -> Vec<TimeRange> {
    match result {
        Ok(ranges) => ranges.into_iter().filter(TimeRange::is_finite).collect(),
        Err(e) => {
            warn!("Treating {} ranges as empty: {}", what, e);
            Vec::new()
        }
    }
}

/// Earliest start across all seekable ranges, 0 when none are reported
pub fn seekable_start(stream: &dyn StreamHandle) -> f64 {
    read_ranges(stream.seekable_ranges(), "seekable")
        .iter()
        .map(|r| r.start)
        .reduce(f64::min)
        .unwrap_or(0.0)
}

/// Latest end across all seekable ranges, the duration when none are reported
pub fn seekable_end(stream: &dyn StreamHandle) -> f64 {
    read_ranges(stream.seekable_ranges(), "seekable")
        .iter()
        .map(|r| r.end)
        .reduce(f64::max)
        .unwrap_or_else(|| stream.duration())
}

/// Latest end across all buffered ranges, if any
pub fn buffered_end(stream: &dyn StreamHandle) -> Option<f64> {
    read_ranges(stream.buffered_ranges(), "buffered")
        .iter()
        .map(|r| r.end)
        .reduce(f64::max)
}

/// Window extents read at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamWindowSnapshot {
    pub start: f64,
    pub end: f64,
    pub buffered_end: Option<f64>,
}

impl StreamWindowSnapshot {
    /// Read all extents from a stream
    pub fn read(stream: &dyn StreamHandle) -> Self {
        Self {
            start: seekable_start(stream),
            end: seekable_end(stream),
            buffered_end: buffered_end(stream),
        }
    }

    /// True when start and end are finite and ordered
    pub fn is_usable(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end >= self.start
    }

    /// Seekable width; NaN when the window is unusable
    pub fn width(&self) -> f64 {
        if self.is_usable() {
            self.end - self.start
        } else {
            f64::NAN
        }
    }
}

/// True when the playhead is within `threshold_sec` of the seekable end
pub fn is_near_live_edge(stream: &dyn StreamHandle, threshold_sec: f64) -> bool {
    let end = seekable_end(stream);
    let position = stream.current_position();
    end.is_finite() && position.is_finite() && end - position <= threshold_sec
}

// ========================================
// In-memory stream
// ========================================

#[derive(Debug)]
struct MemoryStreamInner {
    seekable: Vec<TimeRange>,
    buffered: Vec<TimeRange>,
    duration: f64,
    position: f64,
    paused: bool,
    fast_seek: bool,
    fail_reads: bool,
    seek_log: Vec<f64>,
    play_calls: usize,
}

/// In-memory stream handle for tests and simulation
///
/// Clones share state, so a test can keep one clone while the engine owns
/// another.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    inner: Arc<Mutex<MemoryStreamInner>>,
}

impl MemoryStream {
    /// Live stream with one seekable range and no buffered data
    pub fn live(start: f64, end: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStreamInner {
                seekable: vec![TimeRange::new(start, end)],
                buffered: Vec::new(),
                duration: f64::INFINITY,
                position: start,
                paused: false,
                fast_seek: false,
                fail_reads: false,
                seek_log: Vec::new(),
                play_calls: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStreamInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_buffered(self, ranges: Vec<TimeRange>) -> Self {
        self.lock().buffered = ranges;
        self
    }

    pub fn with_seekable(self, ranges: Vec<TimeRange>) -> Self {
        self.lock().seekable = ranges;
        self
    }

    pub fn with_duration(self, duration: f64) -> Self {
        self.lock().duration = duration;
        self
    }

    pub fn with_position(self, position: f64) -> Self {
        self.lock().position = position;
        self
    }

    pub fn with_fast_seek(self) -> Self {
        self.lock().fast_seek = true;
        self
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn set_seekable(&self, ranges: Vec<TimeRange>) {
        self.lock().seekable = ranges;
    }

    pub fn set_buffered(&self, ranges: Vec<TimeRange>) {
        self.lock().buffered = ranges;
    }

    /// Let `secs` of live time elapse: every range end moves forward, and
    /// the playhead advances unless paused.
    pub fn advance(&self, secs: f64) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for r in inner.seekable.iter_mut().chain(inner.buffered.iter_mut()) {
            r.end += secs;
        }
        if !inner.paused {
            inner.position += secs;
        }
    }

    pub fn position(&self) -> f64 {
        self.lock().position
    }

    /// Every position applied through the handle, oldest first
    pub fn seek_log(&self) -> Vec<f64> {
        self.lock().seek_log.clone()
    }

    pub fn play_calls(&self) -> usize {
        self.lock().play_calls
    }
}

impl StreamHandle for MemoryStream {
    fn current_position(&self) -> f64 {
        self.lock().position
    }

    fn set_position(&mut self, position: f64) {
        let mut inner = self.lock();
        inner.position = position;
        inner.seek_log.push(position);
    }

    fn fast_seek(&mut self, position: f64) -> bool {
        let mut inner = self.lock();
        if !inner.fast_seek {
            return false;
        }
        inner.position = position;
        inner.seek_log.push(position);
        true
    }

    fn seekable_ranges(&self) -> Result<Vec<TimeRange>, RangeReadError> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(RangeReadError("seekable unavailable".to_string()));
        }
        Ok(inner.seekable.clone())
    }

    fn buffered_ranges(&self) -> Result<Vec<TimeRange>, RangeReadError> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(RangeReadError("buffered unavailable".to_string()));
        }
        Ok(inner.buffered.clone())
    }

    fn duration(&self) -> f64 {
        self.lock().duration
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn play(&mut self) {
        let mut inner = self.lock();
        inner.paused = false;
        inner.play_calls += 1;
    }
}
