//! The operation contract: one call, one [`Outcome`].
//!
//! Anything that can be called repeatedly with a [`Context`] and produces an
//! [`Outcome`] is an [`Operation`]. Async closures taking an owned `Context`
//! qualify automatically:
//!
//! ```rust
//! use undertow::{Context, Operation, Outcome};
//!
//! # tokio_test::block_on(async {
//! let mut op = |_ctx: Context| async { Outcome::<String>::finish() };
//! let outcome = op.call(&Context::new()).await;
//! assert!(outcome.is_terminal());
//! # });
//! ```
//!
//! Operations are called through `&mut self`, so they may keep state between
//! attempts. The middlewares in [`crate::middleware`] rely on this.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::context::Context;
use crate::outcome::Outcome;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A dynamically typed, thread-safe error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A fallible, retryable unit of work.
pub trait Operation: Send {
    /// Error type carried by the outcomes.
    type Error: Send;

    /// Run one attempt.
    fn call(&mut self, ctx: &Context) -> impl Future<Output = Outcome<Self::Error>> + Send;

    /// Erase the concrete type.
    fn boxed<'a>(self) -> BoxOperation<'a, Self::Error>
    where
        Self: Sized + 'a,
    {
        BoxOperation::new(self)
    }
}

impl<F, Fut, E> Operation for F
where
    F: FnMut(Context) -> Fut + Send,
    Fut: Future<Output = Outcome<E>> + Send,
    E: Send,
{
    type Error = E;

    fn call(&mut self, ctx: &Context) -> impl Future<Output = Outcome<E>> + Send {
        self(ctx.clone())
    }
}

trait DynOperation<E>: Send {
    fn call_boxed<'a>(&'a mut self, ctx: &'a Context) -> BoxFuture<'a, Outcome<E>>;
}

impl<O: Operation> DynOperation<O::Error> for O {
    fn call_boxed<'a>(&'a mut self, ctx: &'a Context) -> BoxFuture<'a, Outcome<O::Error>> {
        Box::pin(self.call(ctx))
    }
}

/// A type-erased operation.
///
/// Needed when operations of different types must share a slot, e.g. in a
/// runtime list of middlewares (see [`crate::middleware::layered`]).
pub struct BoxOperation<'a, E> {
    inner: Box<dyn DynOperation<E> + 'a>,
}

impl<'a, E> BoxOperation<'a, E> {
    /// Box an operation.
    pub fn new<O>(op: O) -> Self
    where
        O: Operation<Error = E> + 'a,
    {
        Self {
            inner: Box::new(op),
        }
    }
}

impl<E> fmt::Debug for BoxOperation<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxOperation")
            .field("inner", &"<operation>")
            .finish()
    }
}

impl<E: Send> Operation for BoxOperation<'_, E> {
    type Error = E;

    async fn call(&mut self, ctx: &Context) -> Outcome<E> {
        self.inner.call_boxed(ctx).await
    }

    fn boxed<'b>(self) -> BoxOperation<'b, E>
    where
        Self: Sized + 'b,
    {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Countdown {
        left: u32,
    }

    impl Operation for Countdown {
        type Error = String;

        async fn call(&mut self, _ctx: &Context) -> Outcome<String> {
            if self.left == 0 {
                return Outcome::finish();
            }
            self.left -= 1;
            Outcome::recover(format!("{} left", self.left))
        }
    }

    #[tokio::test]
    async fn test_closure_operation() {
        let mut calls = 0;
        let mut op = |_ctx: Context| {
            calls += 1;
            async { Outcome::<String>::retry_after(Duration::from_secs(1)) }
        };

        let outcome = op.call(&Context::new()).await;
        assert_eq!(outcome.backoff_override(), Some(Duration::from_secs(1)));
        let _ = op.call(&Context::new()).await;
        drop(op);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_closure_sees_context() {
        let ctx = Context::new();
        ctx.cancel();

        let mut op = |ctx: Context| async move {
            match ctx.cause() {
                Some(cause) => Outcome::abort(cause.to_string()),
                None => Outcome::finish(),
            }
        };

        let outcome = op.call(&ctx).await;
        assert_eq!(outcome.error().map(String::as_str), Some("context canceled"));
    }

    #[tokio::test]
    async fn test_stateful_operation() {
        let mut op = Countdown { left: 2 };
        let ctx = Context::new();

        assert_eq!(op.call(&ctx).await.error().map(String::as_str), Some("1 left"));
        assert_eq!(op.call(&ctx).await.error().map(String::as_str), Some("0 left"));
        assert!(op.call(&ctx).await.is_terminal());
    }

    #[tokio::test]
    async fn test_boxed_operation_keeps_state() {
        let mut op = Countdown { left: 1 }.boxed();
        let ctx = Context::new();

        assert!(!op.call(&ctx).await.is_terminal());
        assert!(op.call(&ctx).await.is_terminal());
        assert!(format!("{:?}", op).contains("BoxOperation"));
    }

    #[tokio::test]
    async fn test_boxed_operation_runs_on_another_task() {
        let mut op = Countdown { left: 1 }.boxed();

        let handle = tokio::spawn(async move {
            let ctx = Context::new();
            let first = op.call(&ctx).await;
            let second = op.call(&ctx).await;
            (first.is_terminal(), second.is_terminal())
        });

        assert_eq!(handle.await.unwrap(), (false, true));
    }
}
