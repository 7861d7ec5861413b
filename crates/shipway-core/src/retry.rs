//! Declarative retry with exponential backoff.
//!
//! Every component that retries — pipeline stages, the health verifier —
//! consumes the same `RetryPolicy` instead of hand-rolled sleep loops.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff multiplier applied per attempt (2.0 = 2s, 4s, 8s, ...).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base_delay.as_millis() as u64,
            multiplier: default_multiplier(),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    /// Attempt 1 → base, attempt 2 → base × multiplier, and so on.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.base_delay_ms as f64 * factor) as u64)
    }

    /// Worst-case total sleep across all retries (excludes operation time).
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }

    /// Run `op` up to `max_attempts` times, sleeping `delay_for(n)` between
    /// attempts. Returns the first success or the last error.
    pub fn run<T, E, F>(&self, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut(u32) -> std::result::Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(self.delay_for(attempt));
                    }
                }
            }
        }
        // attempts >= 1, so last_err is always set when we get here
        Err(last_err.unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 2000,
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn total_backoff_sums_intermediate_delays() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 2000,
            multiplier: 2.0,
        };
        // 2s + 4s + 8s — no sleep after the final attempt.
        assert_eq!(policy.total_backoff(), Duration::from_secs(14));
    }

    #[test]
    fn run_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            multiplier: 1.0,
        };
        let mut calls = 0;
        let result: Result<u32, &str> = policy.run(|_| {
            calls += 1;
            if calls < 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 2);
    }

    #[test]
    fn run_exhausts_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            multiplier: 1.0,
        };
        let mut calls = 0;
        let result: Result<(), &str> = policy.run(|_| {
            calls += 1;
            Err("always")
        });
        assert_eq!(result, Err("always"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn none_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> = RetryPolicy::none().run(|_| {
            calls += 1;
            Err("no")
        });
        assert_eq!(calls, 1);
    }
}
