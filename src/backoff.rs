//! Backoff strategies: pure functions from attempt index to wait duration.
//!
//! A strategy is anything implementing [`Backoff`], including every
//! `Fn(u64) -> Duration + Send + Sync` closure. Strategies hold no state, so
//! one value can serve any number of concurrent retry loops.
//!
//! Attempt `0` is the first *retry*, i.e. the sleep that follows the initial
//! failed try.
//!
//! # Strategies
//!
//! - **Plain**: fixed delay (`1s, 1s, 1s, ...`)
//! - **Arithmetic**: `initial + delta * attempt` (`1s, 3s, 5s, ...`)
//! - **Fibonacci**: `base * fib(attempt + 1)` (`1s, 1s, 2s, 3s, 5s, ...`)
//! - **Exponential**: `base * 2^attempt` (`1s, 2s, 4s, ...`)
//!
//! # Jitter
//!
//! Jitter is layered in by the caller through a closure:
//!
//! ```rust
//! use undertow::backoff::{self, Backoff};
//! use std::time::Duration;
//!
//! let base = backoff::plain(Duration::from_millis(100));
//! let shifted = move |attempt: u64| base.delay(attempt) + Duration::from_millis(attempt % 7);
//!
//! assert_eq!(shifted.delay(3), Duration::from_millis(103));
//! ```

use std::time::Duration;

/// Maps an attempt index to the duration to wait before that retry.
pub trait Backoff: Send + Sync {
    /// The delay before retry number `attempt` (0-indexed).
    fn delay(&self, attempt: u64) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(u64) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u64) -> Duration {
        self(attempt)
    }
}

/// Fixed delay regardless of attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plain(pub Duration);

impl Plain {
    /// Retry immediately, every time.
    pub const IMMEDIATE: Plain = Plain(Duration::ZERO);
}

impl Backoff for Plain {
    fn delay(&self, _attempt: u64) -> Duration {
        self.0
    }
}

/// Delay grows by `delta` with every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arithmetic {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Added per attempt.
    pub delta: Duration,
}

impl Backoff for Arithmetic {
    fn delay(&self, attempt: u64) -> Duration {
        self.initial
            .saturating_add(scale(self.delta, u128::from(attempt)))
    }
}

/// Delay follows the Fibonacci sequence in units of the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fibonacci(pub Duration);

impl Backoff for Fibonacci {
    fn delay(&self, attempt: u64) -> Duration {
        scale(self.0, fib(attempt.saturating_add(1)))
    }
}

/// Delay doubles with every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential(pub Duration);

impl Backoff for Exponential {
    fn delay(&self, attempt: u64) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u128.checked_shl(shift))
            .unwrap_or(u128::MAX);
        scale(self.0, factor)
    }
}

/// Clamps another strategy to a maximum delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capped<B> {
    inner: B,
    max: Duration,
}

impl<B> Capped<B> {
    /// The wrapped strategy.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// The largest delay this strategy returns.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl<B: Backoff> Backoff for Capped<B> {
    fn delay(&self, attempt: u64) -> Duration {
        self.inner.delay(attempt).min(self.max)
    }
}

/// Constant delay.
///
/// ```rust
/// use undertow::backoff::{self, Backoff};
/// use std::time::Duration;
///
/// let b = backoff::plain(Duration::from_secs(1));
/// assert_eq!(b.delay(0), Duration::from_secs(1));
/// assert_eq!(b.delay(132), Duration::from_secs(1));
/// ```
pub fn plain(delay: Duration) -> Plain {
    Plain(delay)
}

/// Delay = initial + delta * attempt.
///
/// ```rust
/// use undertow::backoff::{self, Backoff};
/// use std::time::Duration;
///
/// let b = backoff::arithmetic(Duration::from_secs(1), Duration::from_secs(2));
/// assert_eq!(b.delay(0), Duration::from_secs(1));
/// assert_eq!(b.delay(1), Duration::from_secs(3));
/// assert_eq!(b.delay(3), Duration::from_secs(7));
/// ```
pub fn arithmetic(initial: Duration, delta: Duration) -> Arithmetic {
    Arithmetic { initial, delta }
}

/// Delay = base * fib(attempt + 1).
///
/// ```rust
/// use undertow::backoff::{self, Backoff};
/// use std::time::Duration;
///
/// let b = backoff::fibonacci(Duration::from_millis(100));
/// // 100ms, 100ms, 200ms, 300ms, 500ms
/// assert_eq!(b.delay(0), Duration::from_millis(100));
/// assert_eq!(b.delay(4), Duration::from_millis(500));
/// ```
pub fn fibonacci(base: Duration) -> Fibonacci {
    Fibonacci(base)
}

/// Delay = base * 2^attempt.
pub fn exponential(base: Duration) -> Exponential {
    Exponential(base)
}

/// Never wait longer than `max`, whatever `inner` computes.
///
/// ```rust
/// use undertow::backoff::{self, Backoff};
/// use std::time::Duration;
///
/// let b = backoff::capped(backoff::exponential(Duration::from_millis(100)), Duration::from_millis(500));
/// assert_eq!(b.delay(2), Duration::from_millis(400));
/// assert_eq!(b.delay(3), Duration::from_millis(500));
/// ```
pub fn capped<B: Backoff>(inner: B, max: Duration) -> Capped<B> {
    Capped { inner, max }
}

/// The nth Fibonacci number, fib(0) = 0, fib(1) = 1. Saturates at u128::MAX.
fn fib(n: u64) -> u128 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u128;
    let mut b = 1u128;
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
        if b == u128::MAX {
            break;
        }
    }
    b
}

/// `d * factor`, saturating at `Duration::MAX`.
fn scale(d: Duration, factor: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    let nanos = d.as_nanos().saturating_mul(factor);
    match u64::try_from(nanos / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}
