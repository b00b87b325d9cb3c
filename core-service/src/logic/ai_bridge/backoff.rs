//! Exponential backoff with ±20% jitter

use std::time::Duration;

use rand::Rng;

pub const JITTER: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay: base * 2^attempt, capped
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(20));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let jitter = rand::thread_rng().gen_range(-JITTER..=JITTER);
        Duration::from_secs_f64((nominal * (1.0 + jitter)).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(700),
        };
        assert_eq!(policy.nominal_delay(0), Duration::from_millis(100));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(400));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(700));
        assert_eq!(policy.nominal_delay(60), Duration::from_millis(700));
    }

    #[test]
    fn test_jitter_within_twenty_percent() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let nominal = policy.nominal_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let d = policy.delay(attempt).as_secs_f64();
                assert!(d >= nominal * 0.8 - 1e-9 && d <= nominal * 1.2 + 1e-9);
            }
        }
    }
}
