//! Backoff strategies for the retry executor.

use std::time::Duration;

/// Delay schedule between retry attempts.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Fixed delay between retries.
    Constant { delay: Duration },
    /// Geometrically increasing delay, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Exponential backoff doubling each attempt, capped at 30 s.
    pub fn exponential(initial: Duration) -> Self {
        Backoff::Exponential {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        if let Backoff::Exponential { multiplier: ref mut m, .. } = self {
            *m = multiplier;
        }
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        if let Backoff::Exponential { max: ref mut cap, .. } = self {
            *cap = max;
        }
        self
    }

    /// Delay before the retry following attempt `attempt` (1-indexed).
    ///
    /// For the exponential schedule this is
    /// `min(max, initial * multiplier^(attempt - 1))`.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Exponential { initial, multiplier, max } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let factor = multiplier.powi(exponent);
                if !factor.is_finite() {
                    return *max;
                }
                let millis = (initial.as_millis() as f64) * factor;
                if millis >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::exponential(Duration::from_millis(500))
    }
}
