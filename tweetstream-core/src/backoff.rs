//! Reconnect backoff: pluggable strategy plus an attempt ceiling.

use std::time::Duration;

use rand::Rng;

/// Produces successive reconnect delays.
pub trait BackoffStrategy: Send {
    fn next_delay(&mut self) -> Duration;

    /// Back to the minimum delay.
    fn reset(&mut self);
}

/// Exponential backoff with a cap and optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Scale each delay by a uniform factor in [0.5, 1.0].
    pub jitter: bool,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: true,
            attempt: 0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Undithered delay for `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(attempt.min(63) as i32);
        let secs = (self.initial.as_secs_f64() * exp).min(self.max.as_secs_f64());
        // Near `Duration::MAX` the f64 round trip can land past the limit.
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(16))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
        } else {
            base
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Backoff strategy plus an optional ceiling on consecutive attempts.
pub struct ReconnectPolicy {
    backoff: Box<dyn BackoffStrategy>,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ReconnectPolicy {
    /// `max_attempts = None` retries forever.
    pub fn new(backoff: impl BackoffStrategy + 'static, max_attempts: Option<u32>) -> Self {
        Self {
            backoff: Box::new(backoff),
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        self.attempts += 1;
        Some(self.backoff.next_delay())
    }

    /// Called on every received byte: the connection is healthy again.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }

    /// Consecutive attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default(), None)
    }
}
