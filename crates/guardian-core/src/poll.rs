//! Bounded polling used for every cross-core wait.

use std::hint;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::CommandError;

/// Budget for one polling wait.
///
/// A policy with neither `timeout_ms` nor `max_spins` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PollPolicy {
    /// Sleep between polls in microseconds; zero busy-spins.
    pub interval_us: u64,
    /// Wall-clock deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Maximum number of predicate evaluations.
    pub max_spins: Option<u64>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_us: 0,
            timeout_ms: Some(5_000),
            max_spins: None,
        }
    }
}

impl PollPolicy {
    /// Policy that never gives up, matching raw hardware spin loops.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            interval_us: 0,
            timeout_ms: None,
            max_spins: None,
        }
    }

    /// Busy-spinning policy with a wall-clock deadline.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = timeout.as_millis() as u64;
        Self {
            interval_us: 0,
            timeout_ms: Some(timeout_ms),
            max_spins: None,
        }
    }

    /// Policy bounded only by a number of predicate evaluations.
    #[must_use]
    pub const fn with_max_spins(max_spins: u64) -> Self {
        Self {
            interval_us: 0,
            timeout_ms: None,
            max_spins: Some(max_spins),
        }
    }

    fn pause(&self) {
        if self.interval_us == 0 {
            hint::spin_loop();
        } else {
            thread::sleep(Duration::from_micros(self.interval_us));
        }
    }
}

/// Failure of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The budget ran out before the condition held.
    #[error("timed out waiting for {what} after {spins} polls ({elapsed:?})")]
    Timeout {
        /// Condition being waited for.
        what: &'static str,
        /// Number of predicate evaluations.
        spins: u64,
        /// Wall-clock time spent.
        elapsed: Duration,
    },
    /// The run was cancelled while waiting.
    #[error("wait for {0} was cancelled")]
    Cancelled(&'static str),
    /// Every party that could satisfy the condition has already left.
    #[error("no worker left to reach {0}")]
    Abandoned(&'static str),
    /// Polling the condition required a command that failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Evaluates `condition` until it holds or `policy` is exhausted.
///
/// Returns the number of evaluations performed.
///
/// # Errors
///
/// Returns [`WaitError::Timeout`] when the budget runs out, or the first
/// error produced by `condition`.
pub fn poll_until<F>(policy: &PollPolicy, what: &'static str, mut condition: F) -> Result<u64, WaitError>
where
    F: FnMut() -> Result<bool, WaitError>,
{
    let started = Instant::now();
    let deadline = policy.timeout_ms.map(Duration::from_millis);
    let mut spins = 0u64;

    loop {
        spins += 1;
        if condition()? {
            return Ok(spins);
        }

        let elapsed = started.elapsed();
        let out_of_time = deadline.is_some_and(|limit| elapsed >= limit);
        let out_of_spins = policy.max_spins.is_some_and(|limit| spins >= limit);
        if out_of_time || out_of_spins {
            return Err(WaitError::Timeout {
                what,
                spins,
                elapsed,
            });
        }
        policy.pause();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{poll_until, PollPolicy, WaitError};
    use crate::CommandError;

    #[test]
    fn returns_number_of_evaluations() {
        let mut remaining = 3;
        let spins = poll_until(&PollPolicy::unbounded(), "countdown", || {
            remaining -= 1;
            Ok(remaining == 0)
        })
        .expect("condition eventually holds");
        assert_eq!(spins, 3);
    }

    #[test]
    fn spin_budget_produces_timeout() {
        let error = poll_until(&PollPolicy::with_max_spins(5), "never", || Ok(false))
            .expect_err("condition never holds");
        match error {
            WaitError::Timeout { what, spins, .. } => {
                assert_eq!(what, "never");
                assert_eq!(spins, 5);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn wall_clock_budget_produces_timeout() {
        let policy = PollPolicy {
            interval_us: 100,
            ..PollPolicy::with_timeout(Duration::from_millis(5))
        };
        let error = poll_until(&policy, "never", || Ok(false)).expect_err("times out");
        assert!(matches!(error, WaitError::Timeout { elapsed, .. } if elapsed >= Duration::from_millis(5)));
    }

    #[test]
    fn condition_errors_are_not_retried() {
        let mut calls = 0;
        let error = poll_until(&PollPolicy::unbounded(), "depth", || {
            calls += 1;
            Err(CommandError::HardwareQuery {
                operation: "buffer_depth",
            }
            .into())
        })
        .expect_err("command failure propagates");
        assert_eq!(calls, 1);
        assert!(matches!(error, WaitError::Command(_)));
    }
}
