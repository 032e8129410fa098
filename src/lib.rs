//! # Undertow
//!
//! Cancellation-aware retries for async Rust.
//!
//! An operation reports every attempt as an [`Outcome`]: keep going, stop
//! with success, or stop with an error. The executor calls it, sleeps for
//! the delay a [`Backoff`] strategy (or the outcome itself) asks for, and
//! stops on the first terminal outcome, when the retry budget runs out, or
//! when the caller's [`Context`] ends.
//!
//! ## Quick Example
//!
//! ```rust
//! use undertow::{backoff, Context, Outcome, Policy, RetryError};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = Policy::new(backoff::exponential(Duration::from_millis(1)), 3);
//! let ctx = Context::new().with_timeout(Duration::from_secs(5));
//!
//! let mut attempts = 0;
//! let result = policy
//!     .retry_context(&ctx, |_ctx: Context| {
//!         attempts += 1;
//!         let n = attempts;
//!         async move {
//!             match n {
//!                 1 => Outcome::recover("connection reset"),
//!                 2 => Outcome::retry_after(Duration::ZERO),
//!                 _ => Outcome::finish(),
//!             }
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(result, Ok(()));
//! assert_eq!(attempts, 3);
//!
//! // Budget exhausted: the last recoverable error is kept.
//! let result = policy
//!     .retry_context(&ctx, |_ctx: Context| async { Outcome::recover("still down") })
//!     .await;
//! assert_eq!(result, Err(RetryError::Exhausted { last: Some("still down") }));
//! # });
//! ```
//!
//! ## Modules
//!
//! - [`outcome`], [`backoff`], [`context`], [`operation`]: the building blocks
//! - [`retry`]: the executor loops and [`RetryError`]
//! - [`middleware`]: moving budget and backoff into the operation
//! - [`http`]: a retrying request/response transport
//! - [`requests`]: durable requests with recorded attempts
//! - [`testing`]: scripted operations, in-memory storage, assertions

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backoff;
#[cfg(feature = "serde")]
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod operation;
pub mod outcome;
pub mod requests;
pub mod retry;
pub mod testing;

// Re-exports
pub use backoff::Backoff;
pub use context::{CancelCause, Context};
pub use middleware::{Chain, Middleware};
pub use operation::{BoxError, BoxFuture, BoxOperation, Operation};
pub use outcome::{Code, Field, Mismatch, Outcome};
pub use retry::{
    retry, retry_blocking, run, Member, Policy, RetryError, RETRY_COUNT_EXCEEDED,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backoff::{self, Backoff};
    pub use crate::context::{CancelCause, Context};
    pub use crate::middleware::{with_backoff, with_max_retry_count, Chain, Middleware};
    pub use crate::operation::{BoxError, Operation};
    pub use crate::outcome::{Code, Outcome};
    pub use crate::retry::{retry, run, Policy, RetryError};
}
