//! Sliding-window admission control.
//!
//! [`RateLimiter`] counts admissions over a trailing window (one minute by
//! default). A call is admitted while the window holds fewer than `capacity`
//! instants; rejected calls are not recorded, so a throttled caller does not
//! extend its own penalty.
//!
//! Time is read from `tokio::time`, so a paused test runtime moves the
//! window along with the processor's sleeps.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limiter allowing `requests_per_minute` admissions per minute.
    pub fn per_minute(requests_per_minute: usize) -> Self {
        Self::new(requests_per_minute, DEFAULT_WINDOW)
    }

    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Admission check against an explicit instant.
    ///
    /// Instants must be non-decreasing across calls; the window is kept in
    /// arrival order and purged from the front.
    pub fn admit_at(&self, now: Instant) -> bool {
        let mut admitted = self.admitted.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
        if admitted.len() >= self.capacity {
            return false;
        }
        admitted.push_back(now);
        true
    }

    /// Number of admissions currently counted against the window.
    pub fn in_window(&self) -> usize {
        self.admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(60)
    }
}
