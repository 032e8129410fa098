//! Retry policy and the executor loops.
//!
//! The decision logic lives in [`Schedule`], which is pure: it looks at an
//! outcome and says "stop with this result" or "sleep this long". The async
//! and blocking loops only add the sleeping.

use std::time::Duration;

use crate::backoff::{Backoff, Plain};
use crate::context::{CancelCause, Context};
use crate::operation::Operation;
use crate::outcome::{Code, Outcome};
use crate::retry::error::RetryError;

/// A reusable retry policy: a backoff strategy plus a retry budget.
///
/// Policies are immutable; every invocation keeps its own counters on the
/// stack, so one policy can drive any number of concurrent retries.
///
/// `retry_count` is the number of *additional* attempts after the first:
/// `retry_count(2)` allows up to three calls.
///
/// # Examples
///
/// ```rust
/// use undertow::{backoff, Context, Outcome, Policy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = Policy::new(backoff::fibonacci(Duration::from_millis(1)), 5);
///
/// let mut calls = 0;
/// let result = policy
///     .retry_context(&Context::new(), |_ctx: Context| {
///         calls += 1;
///         let done = calls == 3;
///         async move {
///             if done {
///                 Outcome::finish()
///             } else {
///                 Outcome::recover("not yet")
///             }
///         }
///     })
///     .await;
///
/// assert!(result.is_ok());
/// assert_eq!(calls, 3);
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy<B> {
    backoff: B,
    retry_count: u64,
}

impl<B: Backoff> Policy<B> {
    /// Create a policy from a strategy and a retry budget.
    pub fn new(backoff: B, retry_count: u64) -> Self {
        Self {
            backoff,
            retry_count,
        }
    }

    /// Replace the retry budget.
    pub fn with_retry_count(mut self, retry_count: u64) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// The backoff strategy.
    pub fn backoff(&self) -> &B {
        &self.backoff
    }

    /// The number of retries after the initial attempt.
    pub fn retry_count(&self) -> u64 {
        self.retry_count
    }

    /// Delay before retry `attempt` according to the strategy alone.
    ///
    /// Returns `None` once `attempt` is outside the budget.
    ///
    /// ```rust
    /// use undertow::{backoff, Policy};
    /// use std::time::Duration;
    ///
    /// let policy = Policy::new(backoff::plain(Duration::from_millis(500)), 2);
    ///
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(500)));
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(500)));
    /// assert_eq!(policy.delay_for_attempt(2), None);
    /// ```
    pub fn delay_for_attempt(&self, attempt: u64) -> Option<Duration> {
        (attempt < self.retry_count).then(|| self.backoff.delay(attempt))
    }

    /// Retry `op` under `ctx`.
    pub async fn retry_context<O>(&self, ctx: &Context, op: O) -> Result<(), RetryError<O::Error>>
    where
        O: Operation,
    {
        drive(ctx, Schedule::new(&self.backoff, Some(self.retry_count)), op).await
    }

    /// Retry a synchronous closure on the current thread, without a context.
    pub fn retry_blocking<F, E>(&self, f: F) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Outcome<E>,
    {
        drive_blocking(Schedule::new(&self.backoff, Some(self.retry_count)), f)
    }
}

/// Retry `op` under `ctx` with a one-off policy.
///
/// ```rust
/// use undertow::{backoff, retry, Context, Outcome, RetryError};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// // A budget of zero still makes the initial attempt.
/// let result = retry(
///     &Context::new(),
///     &backoff::plain(Duration::from_secs(1)),
///     0,
///     |_ctx: Context| async { Outcome::<()>::proceed() },
/// )
/// .await;
///
/// assert_eq!(result, Err(RetryError::Exhausted { last: None }));
/// # });
/// ```
pub async fn retry<B, O>(
    ctx: &Context,
    backoff: &B,
    retry_count: u64,
    op: O,
) -> Result<(), RetryError<O::Error>>
where
    B: Backoff + ?Sized,
    O: Operation,
{
    drive(ctx, Schedule::new(backoff, Some(retry_count)), op).await
}

/// Retry a synchronous closure with a one-off policy, sleeping the thread.
pub fn retry_blocking<B, F, E>(backoff: &B, retry_count: u64, f: F) -> Result<(), RetryError<E>>
where
    B: Backoff + ?Sized,
    F: FnMut() -> Outcome<E>,
{
    drive_blocking(Schedule::new(backoff, Some(retry_count)), f)
}

/// Run an operation that enforces its own budget and backoff.
///
/// This is the loop used with middleware chains: there is no retry budget
/// and no strategy, only the outcome's override is slept. Without an
/// override the operation is re-invoked immediately, so the chain (or the
/// operation) must eventually return a terminal outcome.
pub async fn run<O>(ctx: &Context, op: O) -> Result<(), RetryError<O::Error>>
where
    O: Operation,
{
    drive(ctx, Schedule::new(&Plain::IMMEDIATE, None), op).await
}

/// What the loop does next.
#[derive(Debug)]
pub(crate) enum Step<E> {
    Sleep(Duration),
    Stop(Result<(), RetryError<E>>),
}

/// Per-invocation loop state: attempt index and last recoverable error.
pub(crate) struct Schedule<'a, E, B: ?Sized> {
    backoff: &'a B,
    budget: Option<u64>,
    attempt: u64,
    last: Option<E>,
}

impl<'a, E, B: Backoff + ?Sized> Schedule<'a, E, B> {
    pub(crate) fn new(backoff: &'a B, budget: Option<u64>) -> Self {
        Self {
            backoff,
            budget,
            attempt: 0,
            last: None,
        }
    }

    /// Decide what follows `outcome`.
    pub(crate) fn observe(&mut self, outcome: Outcome<E>) -> Step<E> {
        let code = outcome.code();
        let retry_after = outcome.backoff_override();
        let error = outcome.into_error();

        match code {
            Code::Continue => {}
            Code::Aborted | Code::Finished => {
                return Step::Stop(match error {
                    Some(e) => Err(RetryError::Aborted(e)),
                    None => Ok(()),
                });
            }
            Code::RetryCountExceeded => {
                return Step::Stop(Err(RetryError::Exhausted { last: error }));
            }
        }

        self.last = error;

        if self.budget.is_some_and(|budget| self.attempt >= budget) {
            return Step::Stop(Err(RetryError::Exhausted {
                last: self.last.take(),
            }));
        }

        let delay = retry_after.unwrap_or_else(|| self.backoff.delay(self.attempt));
        self.attempt += 1;

        Step::Sleep(delay)
    }

    /// The error to report when the context wins the race against a sleep.
    pub(crate) fn cancelled(&mut self, cause: CancelCause) -> RetryError<E> {
        RetryError::Cancelled {
            cause,
            last: self.last.take(),
        }
    }
}

async fn drive<E, B, O>(
    ctx: &Context,
    mut schedule: Schedule<'_, E, B>,
    mut op: O,
) -> Result<(), RetryError<E>>
where
    B: Backoff + ?Sized,
    O: Operation<Error = E>,
{
    loop {
        let outcome = op.call(ctx).await;

        let delay = match schedule.observe(outcome) {
            Step::Stop(result) => return result,
            Step::Sleep(delay) => delay,
        };

        if delay.is_zero() {
            continue;
        }

        tokio::select! {
            biased;
            cause = ctx.done() => return Err(schedule.cancelled(cause)),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn drive_blocking<E, B, F>(mut schedule: Schedule<'_, E, B>, mut f: F) -> Result<(), RetryError<E>>
where
    B: Backoff + ?Sized,
    F: FnMut() -> Outcome<E>,
{
    loop {
        match schedule.observe(f()) {
            Step::Stop(result) => return result,
            Step::Sleep(delay) if delay.is_zero() => {}
            Step::Sleep(delay) => std::thread::sleep(delay),
        }
    }
}
