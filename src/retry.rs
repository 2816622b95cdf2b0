// 🔁 Retry - bounded attempts with exponential, jittered backoff
//
// delay(attempt) = base_delay * multiplier^(attempt - 1) * jitter
// jitter is drawn uniformly from [jitter_min, jitter_max) so that workers
// failing together do not retry in lockstep.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

impl RetryPolicy {
    /// Per-entity export: 5 attempts starting at 350ms, ×1.8
    pub fn export() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 350,
            multiplier: 1.8,
            jitter_min: 0.7,
            jitter_max: 1.3,
        }
    }

    /// File moves during registration
    pub fn file_move() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 200,
            multiplier: 2.0,
            jitter_min: 0.7,
            jitter_max: 1.3,
        }
    }

    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Self::export()
        }
    }

    /// Deterministic part of the schedule; `jitter` is the sampled factor.
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay_ms as f64 * self.multiplier.powi(exponent) * jitter;
        Duration::from_nanos((millis * 1_000_000.0).max(0.0).round() as u64)
    }

    pub fn sample_jitter(&self) -> f64 {
        if self.jitter_max > self.jitter_min {
            rand::thread_rng().gen_range(self.jitter_min..self.jitter_max)
        } else {
            self.jitter_min
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".into());
        }
        if !(self.multiplier >= 1.0) {
            return Err("retry.multiplier must be >= 1.0".into());
        }
        if !(self.jitter_min > 0.0 && self.jitter_min <= self.jitter_max) {
            return Err("retry jitter range must satisfy 0 < min <= max".into());
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::export()
    }
}

/// Last error after the policy gave up
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds or the policy is exhausted, sleeping between
/// attempts. `op` receives the 1-based attempt number.
pub fn retry<T, E, F>(policy: &RetryPolicy, label: &str, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    E: fmt::Display,
{
    retry_with_sleep(policy, label, op, thread::sleep)
}

/// [`retry`] with an injectable sleeper.
pub fn retry_with_sleep<T, E, F, S>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    mut sleep: S,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    S: FnMut(Duration),
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last: err,
                })
            }
            Err(err) => {
                let delay = policy.delay_for(attempt, policy.sample_jitter());
                warn!(
                    "{} 第{}次失败，{}ms 后重试: {}",
                    label,
                    attempt,
                    delay.as_millis(),
                    err
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::export();
        assert_eq!(policy.delay_for(1, 1.0), Duration::from_millis(350));
        assert_eq!(policy.delay_for(2, 1.0), Duration::from_millis(630));
        let third = policy.delay_for(3, 1.0).as_secs_f64();
        assert!((third - 1.134).abs() < 1e-9);
        let jittered = policy.delay_for(1, 0.7).as_secs_f64();
        assert!((jittered - 0.245).abs() < 1e-9);
    }

    #[test]
    fn test_sample_jitter_in_range() {
        let policy = RetryPolicy::export();
        for _ in 0..200 {
            let j = policy.sample_jitter();
            assert!((0.7..1.3).contains(&j));
        }
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let policy = RetryPolicy::export();
        let mut sleeps = Vec::new();
        let result: Result<u32, RetryError<String>> = retry_with_sleep(
            &policy,
            "op",
            |attempt| {
                if attempt < 3 {
                    Err(format!("boom {}", attempt))
                } else {
                    Ok(attempt)
                }
            },
            |d| sleeps.push(d),
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[1] > sleeps[0]);
    }

    #[test]
    fn test_retry_gives_up() {
        let policy = RetryPolicy::export();
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = retry_with_sleep(
            &policy,
            "op",
            |_| {
                calls += 1;
                Err("still broken")
            },
            |_| {},
        );

        let err = result.unwrap_err();
        assert_eq!(calls, 5);
        assert_eq!(err.attempts, 5);
        assert_eq!(err.to_string(), "failed after 5 attempt(s): still broken");
    }

    #[test]
    fn test_no_retry_runs_once() {
        let mut calls = 0;
        let _ = retry_with_sleep(
            &RetryPolicy::no_retry(),
            "op",
            |_| -> Result<(), &str> {
                calls += 1;
                Err("x")
            },
            |_| panic!("must not sleep"),
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::export().validate().is_ok());
        let bad = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::export()
        };
        assert!(bad.validate().is_err());
    }
}
