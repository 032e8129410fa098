//! Cancellation context shared by a whole retry invocation.
//!
//! A [`Context`] is a cheap, cloneable handle that can be cancelled
//! explicitly (optionally with a cause), expires at a deadline, and
//! propagates cancellation from parents to children. The executor races its
//! inter-attempt sleep against [`Context::done`]; operations receive the same
//! context and are expected to observe it themselves.
//!
//! # Examples
//!
//! ```rust
//! use undertow::{CancelCause, Context};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let root = Context::new();
//! let scoped = root.with_timeout(Duration::from_secs(30));
//!
//! root.cancel();
//!
//! assert!(scoped.is_done());
//! assert_eq!(scoped.done().await, CancelCause::Cancelled);
//! # });
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context ended.
#[derive(Debug, Clone)]
pub enum CancelCause {
    /// [`Context::cancel`] was called.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
    /// The context was cancelled (or timed out) with a caller-supplied cause.
    Custom(Arc<dyn StdError + Send + Sync>),
}

impl CancelCause {
    /// Wrap any error as a custom cause.
    pub fn custom<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CancelCause::Custom(Arc::new(error))
    }

    /// Returns true if the context timed out without a custom cause.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, CancelCause::DeadlineExceeded)
    }

    /// Downcast a custom cause to a concrete error type.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        match self {
            CancelCause::Custom(err) => err.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for CancelCause {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CancelCause::Cancelled, CancelCause::Cancelled) => true,
            (CancelCause::DeadlineExceeded, CancelCause::DeadlineExceeded) => true,
            (CancelCause::Custom(a), CancelCause::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Cancelled => f.write_str("context canceled"),
            CancelCause::DeadlineExceeded => f.write_str("context deadline exceeded"),
            CancelCause::Custom(err) => write!(f, "{}", err),
        }
    }
}

impl StdError for CancelCause {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CancelCause::Custom(err) => err.source(),
            _ => None,
        }
    }
}

/// A cancellation signal with an optional deadline.
///
/// Clones share state: cancelling one clone cancels all of them. Children
/// created with [`Context::child`], [`Context::with_timeout`] or
/// [`Context::with_deadline`] are cancelled together with their parent but
/// can be cancelled on their own without affecting it.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    // reported when the deadline passes
    timeout_cause: Option<CancelCause>,
    // first cause wins
    cause: OnceLock<CancelCause>,
    parent: Option<Context>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A root context: no deadline, cancelled only explicitly.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                deadline: None,
                timeout_cause: None,
                cause: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// A child that inherits this context's deadline.
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline, self.inner.timeout_cause.clone())
    }

    /// A child that expires after `timeout`, or earlier if this context does.
    ///
    /// A timeout too large to be represented as an instant sets no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Like [`Context::with_timeout`], reporting `cause` instead of
    /// [`CancelCause::DeadlineExceeded`] when the new deadline is hit.
    pub fn with_timeout_cause<E>(&self, timeout: Duration, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline_cause(deadline, Some(CancelCause::custom(cause))),
            None => self.child(),
        }
    }

    /// A child that expires at `deadline`, or earlier if this context does.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.with_deadline_cause(deadline, None)
    }

    fn with_deadline_cause(&self, deadline: Instant, cause: Option<CancelCause>) -> Self {
        match self.inner.deadline {
            Some(parent) if parent <= deadline => self.child(),
            _ => self.derive(Some(deadline), cause),
        }
    }

    fn derive(&self, deadline: Option<Instant>, timeout_cause: Option<CancelCause>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                deadline,
                timeout_cause,
                cause: OnceLock::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this context and its children.
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Cancelled);
    }

    /// Cancel with a caller-supplied cause. Only the first cause is kept.
    pub fn cancel_with_cause<E>(&self, cause: E)
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cancel_with(CancelCause::custom(cause));
    }

    fn cancel_with(&self, cause: CancelCause) {
        let _ = self.inner.cause.set(cause);
        self.inner.token.cancel();
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns true once the context is cancelled or its deadline passed.
    pub fn is_done(&self) -> bool {
        self.inner.token.is_cancelled() || self.deadline_passed()
    }

    /// Why the context ended, or `None` while it is still live.
    pub fn cause(&self) -> Option<CancelCause> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(cause.clone());
        }
        if let Some(cause) = self.inner.parent.as_ref().and_then(Context::cause) {
            return Some(cause);
        }
        if self.deadline_passed() {
            self.expire();
            return self.inner.cause.get().cloned();
        }
        if self.inner.token.is_cancelled() {
            return Some(CancelCause::Cancelled);
        }
        None
    }

    /// Resolves when the context ends, yielding the cause.
    ///
    /// Cancellation-safe; dropping the future has no effect on the context.
    pub async fn done(&self) -> CancelCause {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => self.expire(),
                }
            }
            None => self.inner.token.cancelled().await,
        }
        self.cause().unwrap_or(CancelCause::Cancelled)
    }

    /// The underlying token, for integration with other tokio-util users.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn expire(&self) {
        let cause = self
            .inner
            .timeout_cause
            .clone()
            .unwrap_or(CancelCause::DeadlineExceeded);
        self.cancel_with(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn test_cancel_resolves_done() {
        let ctx = Context::new();
        assert!(!ctx.is_done());
        assert_eq!(ctx.cause(), None);

        ctx.cancel();

        assert!(ctx.is_done());
        assert_eq!(ctx.done().await, CancelCause::Cancelled);
    }

    #[tokio::test]
    async fn test_first_cause_wins() {
        let ctx = Context::new();
        ctx.cancel_with_cause(io::Error::from(io::ErrorKind::UnexpectedEof));
        ctx.cancel();

        let cause = ctx.done().await;
        let io_err = cause.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::new().with_timeout(Duration::from_secs(2));
        let start = Instant::now();

        let cause = ctx.done().await;

        assert!(cause.is_deadline_exceeded());
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(ctx.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cause_is_reported() {
        let ctx = Context::new().with_timeout_cause(
            Duration::from_millis(10),
            io::Error::new(io::ErrorKind::Other, "too slow"),
        );

        let cause = ctx.done().await;
        assert_eq!(cause.to_string(), "too slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_observed_without_waiting() {
        let ctx = Context::new().with_timeout(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(ctx.is_done());
        assert_eq!(ctx.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_parent_cancels_child() {
        let parent = Context::new();
        let child = parent.child();

        parent.cancel_with_cause(io::Error::new(io::ErrorKind::Other, "shutdown"));

        assert!(child.is_done());
        assert_eq!(child.done().await.to_string(), "shutdown");
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent() {
        let parent = Context::new();
        let child = parent.child();

        child.cancel();

        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_parent_deadline() {
        let parent = Context::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(10));

        assert_eq!(child.deadline(), parent.deadline());

        let start = Instant::now();
        child.done().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_sets_no_deadline() {
        let ctx = Context::new().with_timeout(Duration::MAX);
        let caused = Context::new().with_timeout_cause(
            Duration::MAX,
            io::Error::new(io::ErrorKind::Other, "never"),
        );

        assert_eq!(ctx.deadline(), None);
        assert_eq!(caused.deadline(), None);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!ctx.is_done());
        assert!(!caused.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_keeps_parent_deadline() {
        let parent = Context::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::MAX);

        assert_eq!(child.deadline(), parent.deadline());

        let start = Instant::now();
        child.done().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(CancelCause::Cancelled.to_string(), "context canceled");
        assert_eq!(
            CancelCause::DeadlineExceeded.to_string(),
            "context deadline exceeded"
        );
    }
}
