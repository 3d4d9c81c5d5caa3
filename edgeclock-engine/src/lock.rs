//! Playback lock state machine
//!
//! Maps playback events to a boolean "locked" signal that suspends
//! calibration while playback is unstable. Lock events take effect
//! immediately; release is deferred so that settling jitter after a seek or
//! a rebuffer is absorbed.
//!
//! Every lock acquisition advances a generation counter. A scheduled release
//! carries the generation it was scheduled under and is ignored if the
//! machine has been locked again since, so a stale timer can never unlock
//! over a newer lock.
//!
//! The machine itself owns no timers. It returns [`LockTransition`]s and
//! the session turns `ScheduleUnlock` into a cancellable tokio sleep.

use edgeclock_common::config::LockConfig;
use edgeclock_common::events::PlaybackEvent;
use std::time::Duration;

/// Lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// What the caller must do after feeding an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    /// The machine is now locked under `generation`
    Locked { generation: u64 },
    /// Call [`PlaybackLockMachine::release`] with `generation` after `delay`
    ScheduleUnlock { generation: u64, delay: Duration },
}

/// Event-driven playback lock with generation-guarded release
#[derive(Debug, Clone)]
pub struct PlaybackLockMachine {
    state: LockState,
    generation: u64,
    seeked_delay: Duration,
    playing_delay: Duration,
}

impl PlaybackLockMachine {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            state: LockState::Unlocked,
            generation: 0,
            seeked_delay: Duration::from_millis(config.seeked_unlock_ms),
            playing_delay: Duration::from_millis(config.playing_unlock_ms),
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Feed one playback event
    pub fn on_event(&mut self, event: PlaybackEvent) -> LockTransition {
        match event {
            PlaybackEvent::Seeking | PlaybackEvent::Waiting | PlaybackEvent::Stalled => {
                self.generation += 1;
                self.state = LockState::Locked;
                LockTransition::Locked {
                    generation: self.generation,
                }
            }
            PlaybackEvent::Seeked => LockTransition::ScheduleUnlock {
                generation: self.generation,
                delay: self.seeked_delay,
            },
            PlaybackEvent::Playing => LockTransition::ScheduleUnlock {
                generation: self.generation,
                delay: self.playing_delay,
            },
        }
    }

    /// Apply a scheduled release
    ///
    /// Returns true only when this call moved the machine from locked to
    /// unlocked. A release scheduled under an older generation is a no-op.
    pub fn release(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state == LockState::Unlocked {
            return false;
        }
        self.state = LockState::Unlocked;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> PlaybackLockMachine {
        PlaybackLockMachine::new(&LockConfig::default())
    }

    fn scheduled(t: LockTransition) -> (u64, Duration) {
        match t {
            LockTransition::ScheduleUnlock { generation, delay } => (generation, delay),
            other => panic!("Expected ScheduleUnlock, got {:?}", other),
        }
    }

    #[test]
    fn test_starts_unlocked() {
        let m = machine();
        assert_eq!(m.state(), LockState::Unlocked);
        assert!(!m.is_locked());
    }

    #[test]
    fn test_lock_events_lock_immediately() {
        for event in [PlaybackEvent::Seeking, PlaybackEvent::Waiting, PlaybackEvent::Stalled] {
            let mut m = machine();
            assert!(matches!(m.on_event(event), LockTransition::Locked { .. }));
            assert!(m.is_locked());
        }
    }

    #[test]
    fn test_seeked_schedules_long_unlock() {
        let mut m = machine();
        m.on_event(PlaybackEvent::Seeking);
        let (generation, delay) = scheduled(m.on_event(PlaybackEvent::Seeked));
        assert_eq!(delay, Duration::from_millis(1500));
        assert!(m.is_locked(), "release is deferred");
        assert!(m.release(generation));
        assert!(!m.is_locked());
    }

    #[test]
    fn test_playing_schedules_short_unlock() {
        let mut m = machine();
        m.on_event(PlaybackEvent::Waiting);
        let (_, delay) = scheduled(m.on_event(PlaybackEvent::Playing));
        assert_eq!(delay, Duration::from_millis(250));
    }

    #[test]
    fn test_stale_release_does_not_unlock_newer_lock() {
        let mut m = machine();
        m.on_event(PlaybackEvent::Seeking);
        let (stale, _) = scheduled(m.on_event(PlaybackEvent::Seeked));

        // Rebuffer before the seeked release fires
        m.on_event(PlaybackEvent::Waiting);
        assert!(!m.release(stale));
        assert!(m.is_locked());

        let (fresh, _) = scheduled(m.on_event(PlaybackEvent::Playing));
        assert!(m.release(fresh));
        assert!(!m.is_locked());
    }

    #[test]
    fn test_repeated_lock_is_idempotent_in_state() {
        let mut m = machine();
        m.on_event(PlaybackEvent::Seeking);
        m.on_event(PlaybackEvent::Seeking);
        assert!(m.is_locked());
        assert_eq!(m.generation(), 2);
    }

    #[test]
    fn test_release_when_unlocked_reports_no_change() {
        let mut m = machine();
        let (generation, _) = scheduled(m.on_event(PlaybackEvent::Playing));
        assert!(!m.release(generation));
        assert!(!m.is_locked());
    }
}
