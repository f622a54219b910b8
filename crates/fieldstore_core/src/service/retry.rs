//! Bounded retry of a unit of work.
//!
//! # Responsibility
//! - Re-run a whole unit of work after transient failures.
//! - Space attempts with fixed or capped exponential backoff.
//!
//! # Invariants
//! - At most `max_attempts` executions; the first one counts.
//! - Non-transient failures are returned immediately without another attempt.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_BASE_MS: u64 = 50;
const DEFAULT_BACKOFF_MAX_MS: u64 = 1_000;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Exponential {
                base_ms: DEFAULT_BACKOFF_BASE_MS,
                max_ms: DEFAULT_BACKOFF_MAX_MS,
            },
        }
    }
}

impl RetryPolicy {
    /// Retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay_ms: 0 },
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                let delay_ms = base_ms.saturating_mul(1_u64 << shift).min(max_ms);
                Duration::from_millis(delay_ms)
            }
        }
    }
}

/// Terminal failure of a retried unit of work.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed transiently; `last` is the final failure.
    Exhausted { attempts: u32, last: E },
    /// A non-transient failure stopped the loop at `attempt`.
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Aborted { error, .. } => error,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            Self::Aborted { attempt, error } => write!(f, "failed on attempt {attempt}: {error}"),
        }
    }
}

/// Runs `work` until it succeeds, fails non-transiently, or the attempt
/// budget is spent. `work` receives the 1-based attempt number.
///
/// Returns the value together with the number of attempts used.
pub fn run_with_retry<T, E: Display>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut work: impl FnMut(u32) -> Result<T, E>,
) -> Result<(T, u32), RetryError<E>> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match work(attempt) {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if !is_transient(&error) => {
                return Err(RetryError::Aborted { attempt, error })
            }
            Err(error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                })
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "event=retry_scheduled module=retry status=retry attempt={} delay_ms={} error={}",
                    attempt,
                    delay.as_millis(),
                    error
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{run_with_retry, Backoff, RetryError, RetryPolicy};
    use std::time::Duration;

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff: Backoff::Exponential {
                base_ms: 10,
                max_ms: 35,
            },
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(35));
        assert_eq!(policy.delay_for(60), Duration::from_millis(35));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let (value, attempts) = run_with_retry(
            &RetryPolicy::immediate(5),
            |err: &&str| *err == "busy",
            |attempt| if attempt < 3 { Err("busy") } else { Ok(attempt * 10) },
        )
        .unwrap();
        assert_eq!((value, attempts), (30, 3));
    }

    #[test]
    fn budget_exhaustion_reports_last_error() {
        let result: Result<((), u32), _> =
            run_with_retry(&RetryPolicy::immediate(3), |_: &&str| true, |_| Err("busy"));
        assert_eq!(
            result.unwrap_err(),
            RetryError::Exhausted {
                attempts: 3,
                last: "busy"
            }
        );
    }

    #[test]
    fn fatal_failure_stops_immediately() {
        let mut calls = 0;
        let result: Result<((), u32), _> = run_with_retry(
            &RetryPolicy::immediate(5),
            |err: &&str| *err == "busy",
            |_| {
                calls += 1;
                Err("constraint")
            },
        );
        assert_eq!(calls, 1);
        assert_eq!(result.unwrap_err().attempts(), 1);
    }
}
