//! Restart backoff for crashed roles.
//!
//! The delay before restart `n` (0-indexed) is `initial × factor^n`, clamped to
//! `max`, then optionally spread by ±20% jitter. The base is derived from the
//! attempt number only, so jitter never compounds across attempts.

use rand::Rng;
use std::time::Duration;

use crate::config::SupervisorConfig;

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Restarts allowed before the role is declared failed
    pub max_restarts: u32,
    /// Delay before the first restart
    pub initial: Duration,
    /// Upper bound on any delay
    pub max: Duration,
    /// Multiplicative growth per attempt
    pub factor: f64,
    pub jitter: bool,
    /// Uptime after which the restart counter resets
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            initial: Duration::from_millis(config.backoff_initial_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            factor: config.backoff_factor,
            jitter: config.backoff_jitter,
            stable_after: Duration::from_secs(config.stable_after_secs),
        }
    }

    /// Delay before restart number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        if self.jitter {
            let spread: f64 = rand::rng().random_range(0.8..=1.2);
            base.mul_f64(spread).min(self.max)
        } else {
            base
        }
    }

    /// Whether `restarts` already used up the budget
    pub fn exhausted(&self, restarts: u32) -> bool {
        restarts >= self.max_restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartPolicy {
        RestartPolicy {
            max_restarts: 3,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: false,
            stable_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_exponential_growth() {
        let policy = policy();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy();
        assert_eq!(policy.delay(10), Duration::from_secs(10));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RestartPolicy {
            jitter: true,
            ..policy()
        };
        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(160), "{delay:?}");
            assert!(delay <= Duration::from_millis(240), "{delay:?}");
        }
    }

    #[test]
    fn test_budget() {
        let policy = policy();
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
