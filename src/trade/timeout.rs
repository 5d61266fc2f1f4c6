//! Deposit timeout of a single trade.
//!
//! Armed when the take-offer request is sent or accepted, disarmed once the deposit
//! notice is processed. Arming an armed timer and disarming a disarmed one are no-ops.
//! The timer never fires by itself; the [TimeoutWatcher](super::TimeoutWatcher) polls it.

use std::time::{Duration, Instant};

/// One-shot deadline, checked by polling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DepositTimeout {
    deadline: Option<Instant>,
}

impl DepositTimeout {
    /// Creates a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to expire `duration` after `now`. Returns `false` and keeps the
    /// existing deadline if already armed.
    pub fn arm(&mut self, now: Instant, duration: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + duration);
        true
    }

    /// Disarms the timer. Returns `false` if it wasn't armed.
    pub fn disarm(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Whether the timer is armed.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The armed deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the timer is armed and its deadline passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}
