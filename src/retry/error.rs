//! Error type for retry invocations.

use std::error::Error as StdError;
use std::fmt;

use crate::context::CancelCause;

/// Sentinel text reported when the retry budget runs out.
pub const RETRY_COUNT_EXCEEDED: &str = "retry count exceeded";

/// Why a retry invocation ended without success.
///
/// Exhaustion and cancellation are *joined* errors: they carry the
/// exhaustion signal (or the context's cause) together with the last
/// recoverable error, if the final attempt reported one. An abort is
/// returned verbatim.
///
/// # Examples
///
/// ```rust
/// use undertow::{backoff, retry, Context, Outcome, RetryError};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let result = retry(
///     &Context::new(),
///     &backoff::plain(Duration::ZERO),
///     2,
///     |_ctx: Context| async { Outcome::recover("connection reset") },
/// )
/// .await;
///
/// match result {
///     Err(RetryError::Exhausted { last }) => assert_eq!(last, Some("connection reset")),
///     other => panic!("unexpected: {:?}", other),
/// }
/// # });
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The operation stopped the loop with a final error.
    Aborted(E),
    /// The retry budget was spent while the operation still asked to continue.
    Exhausted {
        /// Error of the final attempt, if it reported one.
        last: Option<E>,
    },
    /// The context ended during an inter-attempt sleep.
    Cancelled {
        /// The context's cause.
        cause: CancelCause,
        /// Error of the attempt before the sleep, if it reported one.
        last: Option<E>,
    },
}

/// One member of a joined [`RetryError`].
#[derive(Debug)]
pub enum Member<'a, E> {
    /// The retry-count-exceeded sentinel.
    RetryCountExceeded,
    /// The context's cancellation cause.
    Cause(&'a CancelCause),
    /// An error produced by the operation.
    Operation(&'a E),
}

impl<E> RetryError<E> {
    /// Returns true if the operation aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// Returns true if the retry budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Returns true if the context ended the loop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The operation's error: the abort error, or the last recoverable one.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Aborted(e) => Some(e),
            Self::Exhausted { last } | Self::Cancelled { last, .. } => last.as_ref(),
        }
    }

    /// Consume and return the operation's error.
    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Aborted(e) => Some(e),
            Self::Exhausted { last } | Self::Cancelled { last, .. } => last,
        }
    }

    /// The cancellation cause, if the context ended the loop.
    pub fn cause(&self) -> Option<&CancelCause> {
        match self {
            Self::Cancelled { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Decompose the joined error, signal first.
    ///
    /// ```rust
    /// use undertow::{Member, RetryError};
    ///
    /// let err = RetryError::Exhausted { last: Some("eof") };
    /// let members: Vec<_> = err.errors().collect();
    ///
    /// assert!(matches!(members[0], Member::RetryCountExceeded));
    /// assert!(matches!(members[1], Member::Operation(&"eof")));
    /// ```
    pub fn errors(&self) -> impl Iterator<Item = Member<'_, E>> {
        let (signal, last) = match self {
            Self::Aborted(e) => (None, Some(e)),
            Self::Exhausted { last } => (Some(Member::RetryCountExceeded), last.as_ref()),
            Self::Cancelled { cause, last } => (Some(Member::Cause(cause)), last.as_ref()),
        };
        signal.into_iter().chain(last.map(Member::Operation))
    }

    /// Transform the operation's error.
    pub fn map_err<F, E2>(self, f: F) -> RetryError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Aborted(e) => RetryError::Aborted(f(e)),
            Self::Exhausted { last } => RetryError::Exhausted { last: last.map(f) },
            Self::Cancelled { cause, last } => RetryError::Cancelled {
                cause,
                last: last.map(f),
            },
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted(e) => write!(f, "{}", e),
            Self::Exhausted { last } => {
                f.write_str(RETRY_COUNT_EXCEEDED)?;
                match last {
                    Some(e) => write!(f, "\n{}", e),
                    None => Ok(()),
                }
            }
            Self::Cancelled { cause, last } => {
                write!(f, "{}", cause)?;
                match last {
                    Some(e) => write!(f, "\n{}", e),
                    None => Ok(()),
                }
            }
        }
    }
}

impl<E: StdError + 'static> StdError for RetryError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Aborted(e) => e.source(),
            Self::Exhausted { last } | Self::Cancelled { last, .. } => {
                last.as_ref().map(|e| e as &(dyn StdError + 'static))
            }
        }
    }
}
