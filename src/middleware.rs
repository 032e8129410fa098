//! Middleware: decorators from operation to operation.
//!
//! A middleware wraps an [`Operation`] and inspects (or rewrites) every
//! [`Outcome`] it produces. The two standard ones move the retry budget and
//! the backoff strategy out of the loop and into the operation itself, so a
//! wrapped operation can be driven by the bare [`run`] loop.
//!
//! Wrapped operations carry private counters. Build a fresh chain for every
//! invocation; a wrapped operation is good for exactly one retry loop.
//!
//! # Ordering
//!
//! [`Chain::with`] declares middlewares outermost first:
//! `Chain::new().with(a).with(b).wrap(op)` builds `a(b(op))`, so `a` is the
//! last to see each outcome before the loop does.
//!
//! ```rust
//! use undertow::middleware::{with_backoff, with_max_retry_count, Chain};
//! use undertow::{backoff, Context, Outcome};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mut calls = 0;
//! let result = Chain::new()
//!     .with(with_max_retry_count(2))
//!     .with(with_backoff(backoff::plain(Duration::from_millis(1))))
//!     .retry(&Context::new(), |_ctx: Context| {
//!         calls += 1;
//!         async { Outcome::recover("refused") }
//!     })
//!     .await;
//!
//! assert!(result.unwrap_err().is_exhausted());
//! assert_eq!(calls, 3);
//! # });
//! ```

use std::fmt;

use crate::backoff::Backoff;
use crate::context::Context;
use crate::operation::{BoxOperation, Operation};
use crate::outcome::{Code, Outcome};
use crate::retry::{run, RetryError};

/// Turns one operation into another.
///
/// Every `FnOnce(O) -> P` closure where `P` is an operation is a middleware.
pub trait Middleware<O: Operation> {
    /// The wrapped operation.
    type Operation: Operation;

    /// Wrap `op`.
    fn wrap(self, op: O) -> Self::Operation;
}

impl<O, F, P> Middleware<O> for F
where
    O: Operation,
    F: FnOnce(O) -> P,
    P: Operation,
{
    type Operation = P;

    fn wrap(self, op: O) -> P {
        self(op)
    }
}

/// The middleware that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<O: Operation> Middleware<O> for Identity {
    type Operation = O;

    fn wrap(self, op: O) -> O {
        op
    }
}

/// Two middlewares, `outer` around `inner`.
#[derive(Debug, Clone, Copy)]
pub struct Stack<Outer, Inner> {
    outer: Outer,
    inner: Inner,
}

impl<O, Outer, Inner> Middleware<O> for Stack<Outer, Inner>
where
    O: Operation,
    Inner: Middleware<O>,
    Outer: Middleware<Inner::Operation>,
{
    type Operation = Outer::Operation;

    fn wrap(self, op: O) -> Self::Operation {
        self.outer.wrap(self.inner.wrap(op))
    }
}

/// An ordered list of middlewares, built at compile time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chain<L = Identity> {
    layers: L,
}

impl Chain<Identity> {
    /// An empty chain.
    pub fn new() -> Self {
        Chain { layers: Identity }
    }
}

impl<L> Chain<L> {
    /// Append a middleware. It is nested inside every middleware added
    /// before it.
    pub fn with<M>(self, middleware: M) -> Chain<Stack<L, M>> {
        Chain {
            layers: Stack {
                outer: self.layers,
                inner: middleware,
            },
        }
    }

    /// Apply the chain to `op`.
    pub fn wrap<O>(self, op: O) -> L::Operation
    where
        O: Operation,
        L: Middleware<O>,
    {
        self.layers.wrap(op)
    }

    /// Wrap `op` and drive it with [`run`].
    pub async fn retry<O>(
        self,
        ctx: &Context,
        op: O,
    ) -> Result<(), RetryError<<L::Operation as Operation>::Error>>
    where
        O: Operation,
        L: Middleware<O>,
    {
        run(ctx, self.layers.wrap(op)).await
    }
}

/// Injects a strategy's delay into continuing outcomes.
#[derive(Debug, Clone, Copy)]
pub struct WithBackoff<B> {
    backoff: B,
}

/// Returns a middleware that computes the pause before every retry.
///
/// Outcomes that already carry an override keep it; the attempt counter
/// still advances.
pub fn with_backoff<B: Backoff>(backoff: B) -> WithBackoff<B> {
    WithBackoff { backoff }
}

impl<O: Operation, B: Backoff> Middleware<O> for WithBackoff<B> {
    type Operation = BackoffOperation<O, B>;

    fn wrap(self, op: O) -> Self::Operation {
        BackoffOperation {
            inner: op,
            backoff: self.backoff,
            attempt: 0,
        }
    }
}

/// Operation produced by [`with_backoff`].
pub struct BackoffOperation<O, B> {
    inner: O,
    backoff: B,
    attempt: u64,
}

impl<O, B> BackoffOperation<O, B> {
    /// Retries observed so far.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }
}

impl<O, B: fmt::Debug> fmt::Debug for BackoffOperation<O, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffOperation")
            .field("inner", &"<operation>")
            .field("backoff", &self.backoff)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl<O: Operation, B: Backoff> Operation for BackoffOperation<O, B> {
    type Error = O::Error;

    async fn call(&mut self, ctx: &Context) -> Outcome<O::Error> {
        let outcome = self.inner.call(ctx).await;
        if outcome.code() != Code::Continue {
            return outcome;
        }

        let attempt = self.attempt;
        self.attempt += 1;

        match outcome.backoff_override() {
            Some(_) => outcome,
            None => outcome.with_retry_after(self.backoff.delay(attempt)),
        }
    }
}

/// Enforces a retry budget inside the operation.
#[derive(Debug, Clone, Copy)]
pub struct WithMaxRetryCount {
    max: u64,
}

/// Returns a middleware that allows `max` retries after the first call.
///
/// The continuing outcome past the budget becomes
/// [`Outcome::exhausted`] carrying that outcome's error.
pub fn with_max_retry_count(max: u64) -> WithMaxRetryCount {
    WithMaxRetryCount { max }
}

impl<O: Operation> Middleware<O> for WithMaxRetryCount {
    type Operation = RetryCountOperation<O>;

    fn wrap(self, op: O) -> Self::Operation {
        RetryCountOperation {
            inner: op,
            max: self.max,
            count: 0,
        }
    }
}

/// Operation produced by [`with_max_retry_count`].
pub struct RetryCountOperation<O> {
    inner: O,
    max: u64,
    count: u64,
}

impl<O> RetryCountOperation<O> {
    /// Retries granted so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<O> fmt::Debug for RetryCountOperation<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCountOperation")
            .field("inner", &"<operation>")
            .field("max", &self.max)
            .field("count", &self.count)
            .finish()
    }
}

impl<O: Operation> Operation for RetryCountOperation<O> {
    type Error = O::Error;

    async fn call(&mut self, ctx: &Context) -> Outcome<O::Error> {
        let outcome = self.inner.call(ctx).await;
        if outcome.code() != Code::Continue {
            return outcome;
        }

        if self.count >= self.max {
            return Outcome::exhausted(outcome.into_error());
        }

        self.count += 1;
        outcome
    }
}

/// A type-erased middleware over boxed operations.
pub type BoxMiddleware<E> =
    Box<dyn FnOnce(BoxOperation<'static, E>) -> BoxOperation<'static, E> + Send>;

/// Erase a middleware's type so it can go into a runtime list.
pub fn boxed<M, E>(middleware: M) -> BoxMiddleware<E>
where
    M: Middleware<BoxOperation<'static, E>> + Send + 'static,
    M::Operation: Operation<Error = E> + 'static,
    E: Send + 'static,
{
    Box::new(move |op| middleware.wrap(op).boxed())
}

/// Apply a runtime list of middlewares, first element outermost.
///
/// ```rust
/// use undertow::middleware::{boxed, layered, with_backoff, with_max_retry_count};
/// use undertow::{backoff, run, Context, Outcome};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let op = layered(
///     |_ctx: Context| async { Outcome::recover("refused") },
///     vec![
///         boxed(with_max_retry_count(1)),
///         boxed(with_backoff(backoff::plain(Duration::from_millis(1)))),
///     ],
/// );
///
/// assert!(run(&Context::new(), op).await.unwrap_err().is_exhausted());
/// # });
/// ```
pub fn layered<O, E>(op: O, middlewares: Vec<BoxMiddleware<E>>) -> BoxOperation<'static, E>
where
    O: Operation<Error = E> + 'static,
    E: Send + 'static,
{
    middlewares
        .into_iter()
        .rev()
        .fold(op.boxed(), |op, middleware| middleware(op))
}
