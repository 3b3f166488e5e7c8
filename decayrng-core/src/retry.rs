//! Reconnect backoff with exponential growth and jitter

use rand::Rng;
use std::time::Duration;

/// Reconnect policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, `None` to retry forever
    pub max_attempts: Option<u32>,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            ..Self::default()
        }
    }

    /// Fresh backoff state for this policy
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            current: self.initial_backoff,
            attempts: 0,
        }
    }
}

/// Backoff state across consecutive failures
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        let delay = if self.policy.jitter {
            add_jitter(self.current)
        } else {
            self.current
        };

        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.policy.multiplier)
                .min(self.policy.max_backoff.as_secs_f64()),
        );

        Some(delay)
    }

    /// Failures recorded since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget past failures, e.g. after a successful connect
    pub fn reset(&mut self) {
        self.current = self.policy.initial_backoff;
        self.attempts = 0;
    }
}

fn add_jitter(duration: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=duration.as_millis() / 4);
    duration + Duration::from_millis(jitter_ms as u64)
}
