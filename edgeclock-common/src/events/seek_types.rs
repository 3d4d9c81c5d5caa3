//! Seek- and jump-related type definitions
//!
//! Supporting types shared between the engine's outcomes and the
//! diagnostic events it publishes.

use serde::{Deserialize, Serialize};

/// Which side of the playable window a requested position was clamped to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClampReason {
    /// Requested position was before the window start
    Start,
    /// Requested position was past the guarded window end
    End,
    /// Requested position was already playable
    Within,
}

impl std::fmt::Display for ClampReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClampReason::Start => write!(f, "start"),
            ClampReason::End => write!(f, "end"),
            ClampReason::Within => write!(f, "within"),
        }
    }
}

/// Final classification of a jump request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum JumpDecision {
    /// The chosen target was inside the playable window
    SeekInRange,
    /// The target was before the window and was clamped to its start
    JumpStart,
    /// The target was past the window and was clamped to its end
    JumpEnd,
    /// The request was rejected before any seek
    ParseError,
}

impl std::fmt::Display for JumpDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JumpDecision::SeekInRange => write!(f, "seek-in-range"),
            JumpDecision::JumpStart => write!(f, "jump-start"),
            JumpDecision::JumpEnd => write!(f, "jump-end"),
            JumpDecision::ParseError => write!(f, "parse-error"),
        }
    }
}

impl From<ClampReason> for JumpDecision {
    fn from(reason: ClampReason) -> Self {
        match reason {
            ClampReason::Start => JumpDecision::JumpStart,
            ClampReason::End => JumpDecision::JumpEnd,
            ClampReason::Within => JumpDecision::SeekInRange,
        }
    }
}

/// Playback events consumed from the stream handle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEvent {
    /// A seek has started
    Seeking,
    /// A seek has completed
    Seeked,
    /// Playback halted waiting for data
    Waiting,
    /// Data delivery stalled
    Stalled,
    /// Playback is progressing
    Playing,
}

impl std::fmt::Display for PlaybackEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackEvent::Seeking => write!(f, "seeking"),
            PlaybackEvent::Seeked => write!(f, "seeked"),
            PlaybackEvent::Waiting => write!(f, "waiting"),
            PlaybackEvent::Stalled => write!(f, "stalled"),
            PlaybackEvent::Playing => write!(f, "playing"),
        }
    }
}
