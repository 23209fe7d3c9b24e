//! Jitter strategies to spread retry delays across callers.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a computed backoff delay.
#[derive(Debug, Clone)]
pub enum Jitter {
    /// Use the exact backoff delay.
    None,
    /// Multiply the delay by a uniform factor in `[lower, upper]`.
    Proportional { lower: f64, upper: f64 },
    /// Random delay between zero and the computed delay.
    Full,
}

impl Jitter {
    /// The default strategy: scale by a uniform factor in `[0.75, 1.25]`.
    pub fn proportional() -> Self {
        Jitter::Proportional { lower: 0.75, upper: 1.25 }
    }

    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Apply jitter with a caller-supplied RNG, for deterministic tests.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Proportional { lower, upper } => {
                let factor = rng.random_range(*lower..=*upper);
                delay.mul_f64(factor)
            }
            Jitter::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
        }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::proportional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_returns_exact_delay() {
        assert_eq!(Jitter::None.apply(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn proportional_stays_within_band() {
        let jitter = Jitter::proportional();
        let delay = Duration::from_millis(1000);
        for _ in 0..200 {
            let jittered = jitter.apply(delay);
            assert!(jittered >= Duration::from_millis(750), "got {jittered:?}");
            assert!(jittered <= Duration::from_millis(1250), "got {jittered:?}");
        }
    }

    #[test]
    fn full_stays_below_delay() {
        let jitter = Jitter::full();
        let delay = Duration::from_millis(400);
        for _ in 0..200 {
            assert!(jitter.apply(delay) <= delay);
        }
    }

    #[test]
    fn deterministic_with_seeded_rng() {
        let jitter = Jitter::proportional();
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let delay = Duration::from_millis(800);
        assert_eq!(
            jitter.apply_with_rng(delay, &mut a),
            jitter.apply_with_rng(delay, &mut b)
        );
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::proportional().apply(Duration::ZERO), Duration::ZERO);
    }
}
