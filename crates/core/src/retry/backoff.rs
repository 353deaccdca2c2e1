//! Exponential backoff for transport failures.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff applied to transport failures of a single request.
///
/// Delay for retry `n` (0-indexed) is `initial_delay_ms * multiplier^n`,
/// capped at `max_delay_ms`, then spread by `±jitter`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Backoff {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Relative jitter in `[0, 1)`; 0 disables it.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Backoff {
    /// Delay before retry `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt as i32);
        let mut delay = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..self.jitter);
            delay *= 1.0 + spread;
        }
        Duration::from_millis(delay.max(0.0).round() as u64)
    }

    /// All retry delays in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> Backoff {
        Backoff {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_delays_double() {
        let delays: Vec<_> = exact().delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
    }

    #[test]
    fn test_delay_respects_cap() {
        let backoff = exact();
        assert_eq!(backoff.delay_for_attempt(6), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff {
            jitter: 0.2,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = backoff.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(4_000));
            assert!(delay <= Duration::from_millis(6_000));
        }
    }
}
