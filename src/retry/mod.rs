//! Bounded retry loops with typed outcomes.
//!
//! Object storage is eventually consistent and providers answer lazily;
//! several core operations therefore retry under a fixed delay and a
//! wall-clock budget. Each attempt reports a [`Verdict`]: retriable failures
//! keep looping, non-retriable ones stop immediately, and exhaustion of the
//! budget yields a timeout carrying the last failure as its cause.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::fail::Failure;

/// Outcome of one attempt inside a retry loop.
pub enum Verdict<T> {
    /// The attempt succeeded; the loop ends.
    Done(T),
    /// The attempt failed retriably; the loop continues after the delay.
    Retry(Failure),
    /// The attempt failed in a way that must not be retried.
    Stop(Failure),
}

/// Terminal outcome of a retry loop that did not succeed.
#[derive(Debug)]
pub enum RetryError {
    /// The budget elapsed; `last` is the failure of the final attempt.
    Timeout {
        /// The wall-clock budget that was exhausted.
        budget: Duration,
        /// The failure returned by the last attempt.
        last: Failure,
    },
    /// An attempt reported a non-retriable failure.
    Stopped {
        /// The failure that stopped the loop.
        failure: Failure,
    },
}

impl RetryError {
    /// Convert into a plain [`Failure`]: timeouts become
    /// `FailureKind::Timeout` with the last failure as cause, stops unwrap to
    /// the stopping failure.
    pub fn into_failure(self) -> Failure {
        match self {
            RetryError::Timeout { budget, last } => Failure::timeout(format!(
                "retry budget of {}s exhausted",
                budget.as_secs()
            ))
            .with_cause(last),
            RetryError::Stopped { failure } => failure,
        }
    }
}

/// Run `attempt` every `delay` (plus a small jitter) until it succeeds, stops
/// or the wall-clock `budget` elapses.
///
/// The first attempt runs immediately; the budget is checked before each
/// sleep, so at least one attempt always runs.
pub async fn bounded<T, F, Fut>(
    delay: Duration,
    budget: Duration,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Verdict<T>>,
{
    let deadline = Instant::now() + budget;
    loop {
        match attempt().await {
            Verdict::Done(value) => return Ok(value),
            Verdict::Stop(failure) => return Err(RetryError::Stopped { failure }),
            Verdict::Retry(failure) => {
                if Instant::now() >= deadline {
                    return Err(RetryError::Timeout {
                        budget,
                        last: failure,
                    });
                }
                tokio::time::sleep(jittered(delay)).await;
            }
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let quarter = (delay.as_millis() as u64) / 4;
    let jitter = if quarter == 0 {
        0
    } else {
        rand::rng().random_range(0..=quarter)
    };
    delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::fail::FailureKind;

    use super::*;

    #[tokio::test]
    async fn first_success_short_circuits() {
        let outcome = bounded(Duration::from_secs(1), Duration::from_secs(10), || async {
            Verdict::Done(42)
        })
        .await;
        assert_eq!(outcome.unwrap(), 42);
    }

    #[tokio::test]
    async fn stop_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let outcome: Result<(), _> =
            bounded(Duration::from_secs(1), Duration::from_secs(10), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Verdict::Stop(Failure::invalid_request("malformed")) }
            })
            .await;
        assert!(matches!(outcome, Err(RetryError::Stopped { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_times_out_with_last_cause() {
        let outcome: Result<(), _> = bounded(
            Duration::from_secs(1),
            Duration::from_secs(10),
            || async { Verdict::Retry(Failure::not_found("still absent")) },
        )
        .await;
        let failure = match outcome {
            Err(retry_error) => retry_error.into_failure(),
            Ok(()) => panic!("retry loop should have timed out"),
        };
        assert!(failure.is(FailureKind::Timeout));
        assert_eq!(failure.root_cause().to_string(), "still absent");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_value_appears() {
        let attempts = AtomicUsize::new(0);
        let outcome = bounded(Duration::from_secs(1), Duration::from_secs(10), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Verdict::Retry(Failure::not_found("not yet"))
                } else {
                    Verdict::Done(n)
                }
            }
        })
        .await;
        assert_eq!(outcome.unwrap(), 3);
    }
}
