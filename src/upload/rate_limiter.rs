//! Caps how many pings go out per time window.

use std::time::{Duration, Instant};

/// Answer of [`RateLimiter::get_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimiterState {
    /// Within budget; the count was consumed.
    Incoming,
    /// Budget exhausted; retry once the given duration elapsed.
    Throttled(Duration),
}

/// A sliding-window rate limiter: at most `max_count` uploads per
/// `interval`.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    max_count: u32,
    started: Option<Instant>,
    count: u32,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_count` uploads per `interval`.
    pub fn new(interval: Duration, max_count: u32) -> Self {
        Self {
            interval,
            max_count,
            started: None,
            count: 0,
        }
    }

    fn reset(&mut self) {
        self.started = Some(Instant::now());
        self.count = 0;
    }

    fn elapsed(&self) -> Duration {
        self.started.map(|started| started.elapsed()).unwrap_or_default()
    }

    /// Accounts for one upload about to happen, or reports how long the
    /// worker must sleep before the window reopens.
    pub fn get_state(&mut self) -> RateLimiterState {
        if self.started.is_none() || self.elapsed() >= self.interval {
            self.reset();
        }
        if self.count >= self.max_count {
            let remaining = self.interval.saturating_sub(self.elapsed());
            return RateLimiterState::Throttled(remaining);
        }
        self.count += 1;
        RateLimiterState::Incoming
    }
}
