//! Sliding-window admission control in front of the generation backend.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateLimitConfig;

/// Admits at most `max_requests` within any trailing `window`.
///
/// Rejection is immediate; callers decide what to do instead.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            granted: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_seconds))
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Prune, check and record under one lock.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut granted = self.granted.lock();
        prune(&mut granted, now, self.window);

        if granted.len() >= self.max_requests {
            return false;
        }

        granted.push_back(now);
        true
    }

    /// Free slots in the current window.
    pub fn available(&self) -> usize {
        let mut granted = self.granted.lock();
        prune(&mut granted, Instant::now(), self.window);
        self.max_requests.saturating_sub(granted.len())
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn prune(granted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = granted.front() {
        if now.saturating_duration_since(*oldest) > window {
            granted.pop_front();
        } else {
            break;
        }
    }
}
