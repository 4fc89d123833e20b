use std::time::Duration;
use serde::{Deserialize, Serialize};
use super::serde_millis;

/// Backoff between a failed attempt and its re-submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed {
        #[serde(with = "serde_millis")]
        delay: Duration,
    },
    Exponential {
        #[serde(with = "serde_millis")]
        initial: Duration,
        multiplier: f64,
        #[serde(with = "serde_millis")]
        max_delay: Duration,
    },
    Linear {
        #[serde(with = "serde_millis")]
        initial: Duration,
        #[serde(with = "serde_millis")]
        increment: Duration,
        #[serde(with = "serde_millis")]
        max_delay: Duration,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { initial, multiplier, max_delay } => {
                let secs = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                Duration::from_secs_f64(secs.max(0.0))
            }
            Self::Linear { initial, increment, max_delay } => {
                let delay = initial.saturating_add(increment.saturating_mul(attempt));
                delay.min(*max_delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_is_capped() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.delay(0), Duration::from_secs(1));
        assert_eq!(strategy.delay(1), Duration::from_secs(2));
        assert_eq!(strategy.delay(3), Duration::from_secs(8));
        assert_eq!(strategy.delay(10), Duration::from_secs(30));
        assert_eq!(strategy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_linear_and_fixed() {
        let linear = RetryStrategy::Linear {
            initial: Duration::from_millis(500),
            increment: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(linear.delay(1), Duration::from_millis(750));
        assert_eq!(linear.delay(5), Duration::from_secs(1));

        let fixed = RetryStrategy::Fixed { delay: Duration::from_millis(10) };
        assert_eq!(fixed.delay(7), Duration::from_millis(10));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let strategy: RetryStrategy = toml::from_str(
            r#"
            kind = "linear"
            initial = 100
            increment = 50
            max_delay = 1000
            "#,
        )
        .unwrap();
        assert_eq!(strategy.delay(2), Duration::from_millis(200));
    }
}
