//! Cross-source alert throttle.
//!
//! The only state shared between sources: the time of the last alerted
//! materialization. One mutex guards it and the critical section is a
//! compare-and-update of that instant.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct AlertThrottle {
    min_interval: Duration,
    last_alert: Mutex<Option<Instant>>,
}

impl AlertThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_alert: Mutex::new(None),
        }
    }

    /// Throttle that lets every event through.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns true and records `now` when at least `min_interval` has
    /// passed since the last accepted alert.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        // A poisoned lock still holds a valid instant.
        let mut last = self
            .last_alert
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let due = match *last {
            Some(prev) => now.saturating_duration_since(prev) >= self.min_interval,
            None => true,
        };
        if due {
            *last = Some(now);
        }
        due
    }
}
