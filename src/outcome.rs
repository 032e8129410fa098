//! The outcome of a single attempt.
//!
//! Every invocation of an operation returns an [`Outcome`], which tells the
//! executor whether to keep going, stop successfully, or stop with an error.
//! Outcomes are plain values: building one has no side effects, and the
//! executor only ever looks at the most recent one.
//!
//! # Examples
//!
//! ```rust
//! use undertow::{Code, Outcome};
//! use std::time::Duration;
//!
//! let again: Outcome<String> = Outcome::recover_after("timeout".to_string(), Duration::from_secs(2));
//! assert!(!again.is_terminal());
//! assert_eq!(again.backoff_override(), Some(Duration::from_secs(2)));
//!
//! let done: Outcome<String> = Outcome::finish();
//! assert_eq!(done.code(), Code::Finished);
//! assert!(done.error().is_none());
//! ```

use std::fmt;
use std::time::Duration;

/// What the executor should do after an attempt.
///
/// [`Code::Continue`] is the only non-terminal code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// Retry the operation.
    Continue,
    /// Stop; the attached error is final.
    Aborted,
    /// Stop; the retry budget is spent.
    RetryCountExceeded,
    /// Stop; the operation succeeded.
    Finished,
}

impl Code {
    /// Returns true for every code that ends the retry loop.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Code::Continue)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Continue => "continue",
            Code::Aborted => "aborted",
            Code::RetryCountExceeded => "retry count exceeded",
            Code::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// The outcome of one attempt.
///
/// An outcome carries three things:
///
/// - a [`Code`]: continue, or one of the terminal codes,
/// - an optional backoff override for the next sleep only,
/// - an optional error. Next to [`Code::Continue`] it is a *recoverable*
///   error that is remembered and retried; next to a terminal code it is the
///   final error.
///
/// A terminal outcome without an error denotes success.
///
/// # Immediate retries
///
/// `retry_after == None` means "use the strategy's delay". Any
/// `Some(d)` wins over the strategy for the following sleep, and
/// `Some(Duration::ZERO)` re-invokes the operation immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<E> {
    code: Code,
    retry_after: Option<Duration>,
    error: Option<E>,
}

impl<E> Outcome<E> {
    /// Retry using the strategy's delay.
    pub fn proceed() -> Self {
        Self {
            code: Code::Continue,
            retry_after: None,
            error: None,
        }
    }

    /// Retry and remember `error` as the last recoverable error.
    pub fn recover(error: E) -> Self {
        Self {
            code: Code::Continue,
            retry_after: None,
            error: Some(error),
        }
    }

    /// Retry after `delay` and remember `error`.
    pub fn recover_after(error: E, delay: Duration) -> Self {
        Self {
            code: Code::Continue,
            retry_after: Some(delay),
            error: Some(error),
        }
    }

    /// Retry after `delay` without remembering an error.
    ///
    /// ```rust
    /// use undertow::Outcome;
    /// use std::time::Duration;
    ///
    /// // Zero means "right now".
    /// let now: Outcome<()> = Outcome::retry_after(Duration::ZERO);
    /// assert_eq!(now.backoff_override(), Some(Duration::ZERO));
    /// ```
    pub fn retry_after(delay: Duration) -> Self {
        Self {
            code: Code::Continue,
            retry_after: Some(delay),
            error: None,
        }
    }

    /// Stop immediately; `error` is returned to the caller verbatim.
    pub fn abort(error: E) -> Self {
        Self {
            code: Code::Aborted,
            retry_after: None,
            error: Some(error),
        }
    }

    /// Stop immediately with success.
    pub fn finish() -> Self {
        Self {
            code: Code::Finished,
            retry_after: None,
            error: None,
        }
    }

    /// Stop because the retry budget is spent, keeping the last recoverable
    /// error next to the exhaustion signal.
    pub fn exhausted(last: Option<E>) -> Self {
        Self {
            code: Code::RetryCountExceeded,
            retry_after: None,
            error: last,
        }
    }

    /// The outcome's code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Returns true when this outcome ends the retry loop.
    pub fn is_terminal(&self) -> bool {
        self.code.is_terminal()
    }

    /// The override for the next sleep, if any.
    pub fn backoff_override(&self) -> Option<Duration> {
        self.retry_after
    }

    /// The attached error, if any.
    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// Consume the outcome and return its error.
    pub fn into_error(self) -> Option<E> {
        self.error
    }

    /// Replace the backoff override.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Transform the attached error, keeping code and override.
    pub fn map_err<F, E2>(self, f: F) -> Outcome<E2>
    where
        F: FnOnce(E) -> E2,
    {
        Outcome {
            code: self.code,
            retry_after: self.retry_after,
            error: self.error.map(f),
        }
    }
}

/// The first field in which two outcomes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The [`Code`].
    Code,
    /// The backoff override.
    RetryAfter,
    /// The attached error.
    Err,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Code => f.write_str("code"),
            Field::RetryAfter => f.write_str("retryAfter"),
            Field::Err => f.write_str("err"),
        }
    }
}

/// Describes a divergence found by [`Outcome::compare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// The field that differs.
    pub field: Field,
    /// Rendering of the left-hand value.
    pub original: String,
    /// Rendering of the right-hand value.
    pub other: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compare '{}', original: {}, other: {}",
            self.field, self.original, self.other
        )
    }
}

impl std::error::Error for Mismatch {}

impl<E: PartialEq + fmt::Display> Outcome<E> {
    /// Compare all three fields and describe the first one that differs.
    ///
    /// ```rust
    /// use undertow::Outcome;
    ///
    /// let left: Outcome<String> = Outcome::proceed();
    /// let right: Outcome<String> = Outcome::finish();
    ///
    /// let mismatch = left.compare(&right).unwrap_err();
    /// assert_eq!(
    ///     mismatch.to_string(),
    ///     "compare 'code', original: continue, other: finished"
    /// );
    /// ```
    pub fn compare(&self, other: &Self) -> Result<(), Mismatch> {
        if self.code != other.code {
            return Err(Mismatch {
                field: Field::Code,
                original: self.code.to_string(),
                other: other.code.to_string(),
            });
        }

        if self.retry_after != other.retry_after {
            return Err(Mismatch {
                field: Field::RetryAfter,
                original: render_delay(self.retry_after),
                other: render_delay(other.retry_after),
            });
        }

        if self.error != other.error {
            return Err(Mismatch {
                field: Field::Err,
                original: render_error(self.error.as_ref()),
                other: render_error(other.error.as_ref()),
            });
        }

        Ok(())
    }
}

fn render_delay(delay: Option<Duration>) -> String {
    match delay {
        Some(d) => format!("{:?}", d),
        None => "none".to_string(),
    }
}

fn render_error<E: fmt::Display>(error: Option<&E>) -> String {
    match error {
        Some(e) => e.to_string(),
        None => "none".to_string(),
    }
}
