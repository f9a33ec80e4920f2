//! Delay computation between retry attempts.

use rand::Rng;
use std::time::Duration;

use crate::config::{BackoffStrategy, RetryConfig};

/// Maximum relative jitter applied to a delay (±10%).
pub const JITTER_FACTOR: f64 = 0.1;

/// Delay before the attempt following `attempt` (1-indexed), without jitter.
///
/// Every strategy is clamped to `max_delay`.
pub fn base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let attempt = attempt.max(1);
    let base = config.base_delay.as_secs_f64();

    let secs = match config.strategy {
        BackoffStrategy::Immediate => return Duration::ZERO,
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base * f64::from(attempt),
        BackoffStrategy::Exponential => {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            base * config.backoff_multiplier.powi(exponent)
        }
    };

    clamp_secs(secs, config.max_delay)
}

/// Delay before the next attempt, including jitter when enabled.
pub fn delay_for(attempt: u32, config: &RetryConfig) -> Duration {
    let delay = base_delay(attempt, config);
    if config.jitter {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        apply_jitter(delay, sample)
    } else {
        delay
    }
}

/// Perturb `delay` by `sample * 10%`, where `sample` is in [-1, 1].
///
/// The result is never negative.
pub fn apply_jitter(delay: Duration, sample: f64) -> Duration {
    let secs = delay.as_secs_f64();
    let jittered = secs + secs * JITTER_FACTOR * sample.clamp(-1.0, 1.0);
    Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(Duration::MAX)
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else {
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(strategy: BackoffStrategy) -> RetryConfig {
        RetryConfig::default()
            .with_strategy(strategy)
            .with_delays(Duration::from_secs(1), Duration::from_secs(60))
            .with_jitter(false)
    }

    #[test]
    fn test_exponential_sequence() {
        let config = config(BackoffStrategy::Exponential);
        let delays: Vec<u64> = (1..=4).map(|n| base_delay(n, &config).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_linear_and_fixed() {
        let linear = config(BackoffStrategy::Linear);
        assert_eq!(base_delay(3, &linear), Duration::from_secs(3));

        let fixed = config(BackoffStrategy::Fixed);
        assert_eq!(base_delay(7, &fixed), Duration::from_secs(1));

        let immediate = config(BackoffStrategy::Immediate);
        assert_eq!(delay_for(5, &immediate), Duration::ZERO);
    }

    #[test]
    fn test_clamped_to_max_delay() {
        let config = config(BackoffStrategy::Exponential)
            .with_delays(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(base_delay(10, &config), Duration::from_secs(5));
        assert_eq!(base_delay(500, &config), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_extremes() {
        let delay = Duration::from_secs(10);
        assert_eq!(apply_jitter(delay, 1.0), Duration::from_secs(11));
        assert_eq!(apply_jitter(delay, -1.0), Duration::from_secs(9));
        assert_eq!(apply_jitter(Duration::ZERO, -1.0), Duration::ZERO);
    }

    #[test]
    fn test_huge_delays_saturate() {
        assert_eq!(apply_jitter(Duration::MAX, 1.0), Duration::MAX);

        let config = config(BackoffStrategy::Exponential)
            .with_delays(Duration::from_secs(1), Duration::MAX)
            .with_jitter(true);
        assert_eq!(base_delay(2_000, &config), Duration::MAX);
        assert!(delay_for(2_000, &config) >= Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_ten_percent(attempt in 1u32..12, base_ms in 1u64..5_000) {
            let config = RetryConfig::default()
                .with_delays(Duration::from_millis(base_ms), Duration::from_secs(120))
                .with_jitter(true);
            let nominal = base_delay(attempt, &config).as_secs_f64();
            let actual = delay_for(attempt, &config).as_secs_f64();
            prop_assert!(actual >= nominal * 0.9 - 1e-6);
            prop_assert!(actual <= nominal * 1.1 + 1e-6);
        }

        #[test]
        fn delay_never_exceeds_max(attempt in 1u32..64, multiplier in 0.5f64..10.0) {
            let mut config = RetryConfig::default()
                .with_delays(Duration::from_millis(100), Duration::from_secs(30))
                .with_jitter(false);
            config.backoff_multiplier = multiplier;
            prop_assert!(base_delay(attempt, &config) <= Duration::from_secs(30));
        }
    }
}
