//! # edgeclock Calibration Engine (edgeclock-engine)
//!
//! Maps wall-clock times onto the drifting time axis of a live DVR stream.
//!
//! **Pipeline:** `time_parser` → `zone` (epoch candidates) → `jump`
//! (candidate selection against the calibrated or provisional offset) →
//! `seek` (guarded position change).
//!
//! **Calibration:** `calibration` holds the offset and implements Edge-Snap,
//! `drift` keeps the offset aligned afterwards, and `lock` suspends both
//! while playback is unstable. `session` owns one stream attachment and the
//! tokio timers that drive it.

pub mod calibration;
pub mod drift;
pub mod error;
pub mod jump;
pub mod lock;
pub mod seek;
pub mod session;
pub mod stream;
pub mod time_parser;
pub mod zone;

pub use calibration::{CalibrationSnapshot, CalibrationState, Offset, Skew};
pub use error::{Error, Result};
pub use jump::{JumpOptions, JumpOutcome};
pub use session::{AdSignal, NoAds, Session};
pub use stream::{MemoryStream, StreamHandle, TimeRange};
