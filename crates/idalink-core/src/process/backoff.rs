//! Polling with exponential backoff.
//!
//! Each poll waits `min(previous * multiplier, max)`, starting from
//! `initial`. There is no jitter: exactly one client polls one instance.

use crate::config::LaunchConfig;
use std::time::{Duration, Instant};

/// Backoff schedule for readiness polling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&LaunchConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max,
        }
    }

    pub fn from_config(config: &LaunchConfig) -> Self {
        Self::new(
            config.initial_poll_interval,
            config.backoff_multiplier,
            config.max_poll_interval,
        )
    }

    /// Interval following `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let nanos = (current.as_nanos() as f64 * self.multiplier).round();
        Duration::from_nanos(nanos as u64).min(self.max)
    }

    /// Infinite sequence of poll intervals.
    pub fn intervals(&self) -> Intervals {
        Intervals {
            policy: *self,
            next: self.initial.min(self.max),
        }
    }

    /// Start polling against a deadline `timeout` from now.
    pub fn start(&self, timeout: Duration) -> Poller {
        Poller {
            intervals: self.intervals(),
            started: Instant::now(),
            deadline: Instant::now() + timeout,
            timeout,
        }
    }
}

/// Iterator over backoff intervals.
#[derive(Debug, Clone)]
pub struct Intervals {
    policy: BackoffPolicy,
    next: Duration,
}

impl Iterator for Intervals {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = self.policy.next_interval(current);
        Some(current)
    }
}

/// Deadline-bounded backoff state for one polling phase.
#[derive(Debug, Clone)]
pub struct Poller {
    intervals: Intervals,
    started: Instant,
    deadline: Instant,
    timeout: Duration,
}

impl Poller {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Next sleep, clipped to the deadline. `None` once the deadline passed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let interval = self.intervals.next().unwrap_or(self.intervals.policy.max);
        Some(interval.min(remaining))
    }
}
