//! Retry/timeout executor with a validity predicate.
//!
//! # Retry Policy
//!
//! - Attempts: bounded (`N` total) or unbounded
//! - Per-attempt deadline: the operation races a timer; the loser is dropped
//! - Fixed delay between attempts, no backoff
//!
//! # Failed Attempts
//!
//! An attempt fails when the operation returns a [`TransportError`], misses
//! its deadline, or resolves to a payload the validity predicate rejects.
//! All three are retried the same way.
//!
//! Bounded policies surface a [`RetryError`] after the last attempt. Unbounded
//! policies never give up on their own; every failure is logged at `warn`
//! instead, and only [`run_with_retry_while`]'s stop check ends the loop.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLimit {
    Bounded(NonZeroU32),
    Unbounded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: AttemptLimit,
    pub per_attempt_timeout: Duration,
    pub inter_attempt_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(4, Duration::from_secs(10), Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// At most `max_attempts` invocations; zero is treated as one.
    #[must_use]
    pub fn bounded(max_attempts: u32, per_attempt_timeout: Duration, delay: Duration) -> Self {
        Self {
            attempts: AttemptLimit::Bounded(NonZeroU32::new(max_attempts).unwrap_or(NonZeroU32::MIN)),
            per_attempt_timeout,
            inter_attempt_delay: delay,
        }
    }

    #[must_use]
    pub fn unbounded(per_attempt_timeout: Duration, delay: Duration) -> Self {
        Self {
            attempts: AttemptLimit::Unbounded,
            per_attempt_timeout,
            inter_attempt_delay: delay,
        }
    }

    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        matches!(self.attempts, AttemptLimit::Unbounded)
    }
}

/// Why a single attempt did not produce a usable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Transport(TransportError),
    #[error("invalid result: {0}")]
    InvalidResult(String),
    #[error("attempt timed out after {} ms", .0.as_millis())]
    TimedOut(Duration),
}

/// Terminal outcome of an executor call that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// A bounded policy ran out of attempts.
    #[error("{label} failed after {attempts} attempts: {last}")]
    Exhausted {
        label: String,
        attempts: u32,
        last: AttemptFailure,
    },
    /// The caller's keep-going check turned false between attempts.
    #[error("{label} stopped after {attempts} attempts")]
    Stopped { label: String, attempts: u32 },
}

impl RetryError {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Exhausted { label, .. } | Self::Stopped { label, .. } => label,
        }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Stopped { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub const fn last_failure(&self) -> Option<&AttemptFailure> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Stopped { .. } => None,
        }
    }
}

/// A value that passed the validity predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated<T> {
    pub value: T,
    /// Attempt number that produced `value`, starting at 1.
    pub attempts: u32,
}

/// One invocation of the operation, owned by a single executor call.
#[derive(Debug)]
struct Attempt {
    number: u32,
    deadline: Instant,
}

impl Attempt {
    fn start(number: u32, policy: &RetryPolicy) -> Self {
        Self {
            number,
            deadline: Instant::now() + policy.per_attempt_timeout,
        }
    }

    async fn run<T, U, Fut, V>(
        self,
        operation: Fut,
        validate: &V,
        timeout: Duration,
    ) -> Result<U, AttemptFailure>
    where
        Fut: Future<Output = Result<T, TransportError>>,
        V: Fn(T) -> Result<U, String>,
    {
        tracing::trace!(attempt = self.number, "Starting attempt");
        match tokio::time::timeout_at(self.deadline, operation).await {
            Ok(Ok(raw)) => validate(raw).map_err(AttemptFailure::InvalidResult),
            Ok(Err(e)) => Err(AttemptFailure::Transport(e)),
            Err(_) => Err(AttemptFailure::TimedOut(timeout)),
        }
    }
}

/// Run `operation` under `policy` until `validate` accepts its output.
///
/// `operation` is called once per attempt and must build a fresh request each
/// time. `validate` converts the raw output into the value the caller keeps,
/// or explains why the output is unusable.
///
/// # Returns
///
/// - `Ok(Validated)` as soon as one attempt validates
/// - `Err(RetryError::Exhausted)` after the last bounded attempt fails; never
///   for unbounded policies
pub async fn run_with_retry<T, U, Op, Fut, V>(
    label: &str,
    policy: &RetryPolicy,
    operation: Op,
    validate: V,
) -> Result<Validated<U>, RetryError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    V: Fn(T) -> Result<U, String>,
{
    run_with_retry_while(label, policy, || true, operation, validate).await
}

/// [`run_with_retry`] with a cooperative stop check.
///
/// `keep_going` is consulted before every attempt, never during one: an
/// attempt already in flight always runs to completion or to its deadline.
/// When it returns `false` the loop ends with [`RetryError::Stopped`].
pub async fn run_with_retry_while<T, U, K, Op, Fut, V>(
    label: &str,
    policy: &RetryPolicy,
    keep_going: K,
    mut operation: Op,
    validate: V,
) -> Result<Validated<U>, RetryError>
where
    K: Fn() -> bool,
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    V: Fn(T) -> Result<U, String>,
{
    let mut number: u32 = 0;

    loop {
        if !keep_going() {
            tracing::debug!(label, attempts = number, "Retry loop stopped by caller");
            return Err(RetryError::Stopped {
                label: label.to_string(),
                attempts: number,
            });
        }

        number = number.saturating_add(1);
        let attempt = Attempt::start(number, policy);
        let failure = match attempt
            .run(operation(), &validate, policy.per_attempt_timeout)
            .await
        {
            Ok(value) => {
                if number > 1 {
                    tracing::info!(label, attempts = number, "Operation succeeded after retry");
                }
                return Ok(Validated {
                    value,
                    attempts: number,
                });
            }
            Err(failure) => failure,
        };

        match policy.attempts {
            AttemptLimit::Bounded(max) if number >= max.get() => {
                tracing::warn!(label, attempts = number, error = %failure, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    label: label.to_string(),
                    attempts: number,
                    last: failure,
                });
            }
            AttemptLimit::Bounded(max) => {
                tracing::debug!(
                    label,
                    attempt = number,
                    max_attempts = max.get(),
                    delay_ms = policy.inter_attempt_delay.as_millis(),
                    error = %failure,
                    "Attempt failed, retrying"
                );
            }
            AttemptLimit::Unbounded => {
                tracing::warn!(
                    label,
                    attempt = number,
                    delay_ms = policy.inter_attempt_delay.as_millis(),
                    error = %failure,
                    "Attempt failed, retrying without limit"
                );
            }
        }

        tokio::time::sleep(policy.inter_attempt_delay).await;
    }
}
