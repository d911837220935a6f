//! Backoff policy between dispatch attempts.
//!
//! The default policy waits a fixed 5 seconds and never gives up. Bounded and
//! exponential policies are opt-in through configuration.

use std::time::Duration;

use rand::Rng;

/// Default wait between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default cap for exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay after every failure.
    Fixed,
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    Exponential,
}

impl std::str::FromStr for BackoffStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "exponential" => Ok(BackoffStrategy::Exponential),
            _ => Err(()),
        }
    }
}

/// Retry policy injected into every `DispatchRetryLoop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of random jitter added to exponential delays.
    pub jitter: Duration,
    /// Total dispatch attempts allowed. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Unbounded retry with a constant delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: delay,
            max_delay: delay,
            jitter: Duration::ZERO,
            max_attempts: None,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: Duration::ZERO,
            max_attempts: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_another(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// Wait before the attempt that follows failed attempt number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = self
                    .base_delay
                    .checked_mul(1u32 << exponent)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay);
                delay + self.random_jitter()
            }
        }
    }

    fn random_jitter(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}
