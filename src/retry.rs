//! Bounded retry around one remote call.
//!
//! Every attempt ends in one of three [`Step`]s: done, retry after a delay,
//! or fail. The loop in [`RetryPolicy::run`] only sleeps and re-invokes; all
//! decisions live in [`RetryPolicy::decide`], so attempt limits and delays are
//! testable without a network.
//!
//! - Rate limiting (HTTP 429): wait `Retry-After` (clamped to `max_delay`) or
//!   exponential backoff, at most `max_attempts` calls in total, then fail
//!   with `RateLimited`.
//! - Transport errors and per-attempt timeouts: `transport_retries` extra
//!   tries with a short fixed delay.
//! - Auth errors are returned immediately. Refreshing credentials is the
//!   orchestrator's call, not ours.

use std::{future::Future, time::Duration};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AuthError, BoxError, SourceError, UnavailableReason};

/// Classified failure of a single remote call attempt.
#[derive(Debug)]
pub enum CallError {
    RateLimited { retry_after: Option<Duration> },
    Network(BoxError),
    Timeout,
    /// The remote rejected our bearer token (HTTP 401).
    Unauthorized,
    /// Acquiring a token failed before the call was made.
    Auth(AuthError),
    Malformed(BoxError),
    Status(u16),
}

#[derive(Debug)]
pub enum Step<T> {
    Done(T),
    Retry(Duration),
    Fail(SourceError),
}

/// Counters carried across attempts of one `run`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Attempts {
    pub calls: u32,
    pub rate_limited: u32,
    pub transport_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Max calls while the remote keeps answering 429.
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    pub transport_retries: u32,
    #[serde(rename = "transport_delay_ms", with = "millis")]
    pub transport_delay: Duration,
    #[serde(rename = "attempt_timeout_ms", with = "millis")]
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            transport_retries: 2,
            transport_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. For tests.
    pub fn immediate(max_attempts: u32, transport_retries: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            transport_retries,
            transport_delay: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`. `attempt` is 1-based.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what to do after one attempt. `state` must already count it.
    pub fn decide<T>(&self, outcome: Result<T, CallError>, state: &mut Attempts) -> Step<T> {
        match outcome {
            Ok(v) => Step::Done(v),
            Err(CallError::RateLimited { retry_after }) => {
                state.rate_limited += 1;
                metrics::counter!("remote_rate_limited_total").increment(1);
                if state.rate_limited >= self.max_attempts {
                    return Step::Fail(SourceError::unavailable(UnavailableReason::RateLimited));
                }
                let delay = retry_after
                    .map(|d| d.min(self.max_delay))
                    .unwrap_or_else(|| self.backoff_delay(state.rate_limited));
                Step::Retry(delay)
            }
            Err(CallError::Network(cause)) => {
                state.transport_failures += 1;
                if state.transport_failures > self.transport_retries {
                    return Step::Fail(SourceError::unavailable_with(
                        UnavailableReason::Network,
                        cause,
                    ));
                }
                Step::Retry(self.transport_delay)
            }
            Err(CallError::Timeout) => {
                state.transport_failures += 1;
                if state.transport_failures > self.transport_retries {
                    return Step::Fail(SourceError::unavailable(UnavailableReason::Timeout));
                }
                Step::Retry(self.transport_delay)
            }
            Err(CallError::Unauthorized) => Step::Fail(SourceError::Auth(AuthError::TokenRejected)),
            Err(CallError::Auth(e)) => Step::Fail(SourceError::Auth(e)),
            Err(CallError::Malformed(cause)) => Step::Fail(SourceError::unavailable_with(
                UnavailableReason::MalformedResponse,
                cause,
            )),
            Err(CallError::Status(code)) => {
                Step::Fail(SourceError::unavailable(UnavailableReason::Upstream(code)))
            }
        }
    }

    /// Runs `op` until it succeeds or the policy gives up. Each attempt is
    /// bounded by `attempt_timeout`; hitting it counts as a transport failure.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut state = Attempts::default();
        loop {
            state.calls += 1;
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(CallError::Timeout),
            };
            match self.decide(outcome, &mut state) {
                Step::Done(v) => {
                    if state.calls > 1 {
                        debug!(target: "retry", calls = state.calls, "succeeded after retry");
                    }
                    return Ok(v);
                }
                Step::Retry(delay) => {
                    metrics::counter!("remote_retry_attempts_total").increment(1);
                    warn!(
                        target: "retry",
                        call = state.calls,
                        rate_limited = state.rate_limited,
                        transport_failures = state.transport_failures,
                        delay_ms = delay.as_millis() as u64,
                        "remote call failed; retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Step::Fail(e) => {
                    warn!(target: "retry", calls = state.calls, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(p.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(4), Duration::from_secs(8));
        assert_eq!(p.backoff_delay(5), Duration::from_secs(10));
        assert_eq!(p.backoff_delay(500), Duration::from_secs(10));
    }

    #[test]
    fn retry_after_is_clamped_to_max_delay() {
        let p = RetryPolicy {
            max_delay: Duration::from_secs(30),
            ..RetryPolicy::default()
        };
        let mut st = Attempts::default();
        let step = p.decide::<()>(
            Err(CallError::RateLimited {
                retry_after: Some(Duration::from_secs(120)),
            }),
            &mut st,
        );
        assert!(matches!(step, Step::Retry(d) if d == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_makes_exactly_max_attempts_calls() {
        let p = RetryPolicy::immediate(4, 2);
        let calls = &AtomicU32::new(0);
        let r: Result<(), _> = p
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::RateLimited { retry_after: None })
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            r,
            Err(SourceError::Unavailable {
                reason: UnavailableReason::RateLimited,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn transport_errors_retry_a_fixed_number_of_times() {
        let p = RetryPolicy::immediate(4, 2);
        let calls = &AtomicU32::new(0);
        let r: Result<(), _> = p
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Network("connection reset".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            r,
            Err(SourceError::Unavailable {
                reason: UnavailableReason::Network,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn auth_errors_are_never_retried() {
        let p = RetryPolicy::immediate(4, 2);
        let calls = &AtomicU32::new(0);
        let r: Result<(), _> = p
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Unauthorized)
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(r, Err(SourceError::Auth(AuthError::TokenRejected))));
    }

    #[tokio::test]
    async fn recovers_after_transient_rate_limit() {
        let p = RetryPolicy::immediate(4, 2);
        let calls = &AtomicU32::new(0);
        let r = p
            .run(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CallError::RateLimited {
                        retry_after: Some(Duration::ZERO),
                    })
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(r, 2);
    }

    #[tokio::test]
    async fn slow_attempt_counts_as_timeout() {
        let p = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..RetryPolicy::immediate(3, 0)
        };
        let r: Result<(), _> = p
            .run(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            r,
            Err(SourceError::Unavailable {
                reason: UnavailableReason::Timeout,
                ..
            })
        ));
    }
}
