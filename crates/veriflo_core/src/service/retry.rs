//! Optimistic-concurrency retry combinator.
//!
//! # Responsibility
//! - Re-run a read/compare/conditional-write step until it wins or the
//!   attempt bound is spent.
//! - Apply a linear backoff between lost races.
//!
//! # Invariants
//! - The step runs at most `max_attempts` times.
//! - Errors from the step propagate immediately and are never retried.
//! - No sleep happens after the last attempt.

use std::thread;
use std::time::Duration;

/// Linear backoff: attempt `n` is followed by a `step * n` pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    step: Duration,
}

impl BackoffPolicy {
    /// Builds a policy. `max_attempts` below one is raised to one.
    pub fn new(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            step,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause after a lost race on `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(50))
    }
}

/// Result of one optimistic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The conditional write won.
    Done(T),
    /// Another writer changed the value first.
    Conflict,
}

/// Final outcome of [`retry_optimistic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retried<T> {
    Done { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Runs `step` until it returns [`Attempt::Done`] or the bound is spent.
///
/// `step` receives the 1-based attempt number.
pub fn retry_optimistic<T, E>(
    policy: &BackoffPolicy,
    mut step: impl FnMut(u32) -> Result<Attempt<T>, E>,
) -> Result<Retried<T>, E> {
    for attempt in 1..=policy.max_attempts() {
        match step(attempt)? {
            Attempt::Done(value) => {
                return Ok(Retried::Done {
                    value,
                    attempts: attempt,
                })
            }
            Attempt::Conflict => {
                if attempt < policy.max_attempts() {
                    thread::sleep(policy.delay_for(attempt));
                }
            }
        }
    }

    Ok(Retried::Exhausted {
        attempts: policy.max_attempts(),
    })
}

#[cfg(test)]
mod tests {
    use super::{retry_optimistic, Attempt, BackoffPolicy, Retried};
    use std::time::{Duration, Instant};

    #[test]
    fn delay_grows_linearly() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(4), Duration::from_millis(200));
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        assert_eq!(BackoffPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn returns_first_win_with_attempt_count() {
        let policy = BackoffPolicy::new(5, Duration::ZERO);
        let outcome: Result<_, ()> = retry_optimistic(&policy, |attempt| {
            Ok(if attempt < 3 {
                Attempt::Conflict
            } else {
                Attempt::Done(attempt * 10)
            })
        });
        assert_eq!(
            outcome,
            Ok(Retried::Done {
                value: 30,
                attempts: 3
            })
        );
    }

    #[test]
    fn exhausts_after_bound_and_skips_trailing_sleep() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(20));
        let mut calls = 0;
        let started = Instant::now();
        let outcome: Result<Retried<()>, ()> = retry_optimistic(&policy, |_| {
            calls += 1;
            Ok(Attempt::Conflict)
        });
        let elapsed = started.elapsed();

        assert_eq!(outcome, Ok(Retried::Exhausted { attempts: 3 }));
        assert_eq!(calls, 3);
        // 20ms + 40ms between attempts, nothing after the third.
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(120 + 500));
    }

    #[test]
    fn errors_stop_the_loop() {
        let policy = BackoffPolicy::new(5, Duration::ZERO);
        let mut calls = 0;
        let outcome: Result<Retried<()>, &str> = retry_optimistic(&policy, |_| {
            calls += 1;
            Err("store offline")
        });
        assert_eq!(outcome, Err("store offline"));
        assert_eq!(calls, 1);
    }
}
