//! Error types for edgeclock-engine
//!
//! Defines engine error types using thiserror. None of these are fatal: the
//! jump API folds every one of them into a structured `JumpOutcome`, and the
//! timer-driven components log and skip.

use thiserror::Error;

use crate::time_parser::TimeParseError;

/// Why calibration or a jump was suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// An external ad-detection signal reports an ad break
    AdActive,
    /// Playback is seeking, buffering or stalled
    Locked,
}

impl SuspendReason {
    /// Reason code surfaced in outcomes and diagnostics
    pub fn code(&self) -> &'static str {
        match self {
            SuspendReason::AdActive => "ad-active",
            SuspendReason::Locked => "locked",
        }
    }
}

impl std::fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Main error type for the calibration engine
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed local time input
    #[error("Invalid time: {0}")]
    InvalidTime(#[from] TimeParseError),

    /// Unknown IANA zone identifier or unrepresentable local date-time
    #[error("Invalid zone: {0}")]
    InvalidZone(String),

    /// The stream reports no usable seekable or buffered data
    #[error("Range unavailable: {0}")]
    RangeUnavailable(String),

    /// No calibration offset has been established yet
    #[error("Uncalibrated: no stream-to-epoch offset")]
    Uncalibrated,

    /// Operation refused while playback is unstable or an ad is playing
    #[error("Suspended: {0}")]
    Suspended(SuspendReason),

    /// A seek target was not a finite number
    #[error("Invalid seek target: {0}")]
    InvalidTarget(f64),

    /// The session has no attached stream
    #[error("No stream attached")]
    Detached,

    /// Error bubbled up from the common crate
    #[error(transparent)]
    Common(#[from] edgeclock_common::Error),
}

impl Error {
    /// Kebab-case reason code used in `JumpOutcome::reason`
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::InvalidTime(e) => e.code(),
            Error::InvalidZone(_) => "invalid-zone",
            Error::RangeUnavailable(_) => "range-unavailable",
            Error::Uncalibrated => "uncalibrated",
            Error::Suspended(reason) => reason.code(),
            Error::InvalidTarget(_) => "invalid-target",
            Error::Detached => "detached",
            Error::Common(_) => "config",
        }
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
