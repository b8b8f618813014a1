//! Delay schedule between connection attempts

use std::time::Duration;

use qab_core::BackoffConfig;

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Fraction of the delay added at random (0.0 to 1.0)
    jitter: f64,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a backoff with explicit parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial.min(max),
            max,
            multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
            jitter: if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) },
            attempts: 0,
        }
    }

    /// Get the next delay and advance the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts = self.attempts.saturating_add(1);

        let next = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::try_from_secs_f64(next)
            .unwrap_or(self.max)
            .min(self.max);

        let jitter = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or_default())
    }

    /// Number of delays handed out since creation or the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
        self.attempts = 0;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
