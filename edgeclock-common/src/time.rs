//! Wall-clock sources
//!
//! The calibration engine never reads the system clock directly. Every
//! component receives a [`WallClock`] so that tests and the simulator can
//! drive epoch time by hand.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of the current epoch time
pub trait WallClock: Send + Sync {
    /// Current UTC timestamp
    fn now(&self) -> DateTime<Utc>;

    /// Current epoch time in (fractional) seconds
    fn epoch_secs(&self) -> f64 {
        self.now().timestamp_millis() as f64 / 1000.0
    }

    /// Current epoch time in milliseconds
    fn epoch_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulation
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a clock frozen at the given epoch second
    pub fn at_epoch_secs(secs: i64) -> Self {
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    /// Replace the current time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    /// Move the clock forward by `millis` milliseconds
    pub fn advance_ms(&self, millis: i64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += Duration::milliseconds(millis);
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Convert milliseconds to a std duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_returns_recent_timestamp() {
        let secs = SystemClock.epoch_secs();
        // After 2000-01-01, before 2100-01-01
        assert!(secs > 946_684_800.0);
        assert!(secs < 4_102_444_800.0);
    }

    #[test]
    fn test_manual_clock_is_frozen() {
        let clock = ManualClock::at_epoch_secs(1_000);
        assert_eq!(clock.epoch_secs(), 1_000.0);
        assert_eq!(clock.epoch_secs(), 1_000.0);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_epoch_secs(1_000);
        clock.advance_ms(1_500);
        assert_eq!(clock.epoch_ms(), 1_001_500);
        assert_eq!(clock.epoch_secs(), 1_001.5);
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::at_epoch_secs(0);
        let later = DateTime::from_timestamp(86_400, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(250), std::time::Duration::from_millis(250));
        assert_eq!(millis_to_duration(1000), std::time::Duration::from_secs(1));
    }
}
