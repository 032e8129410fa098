//! The retry executor.
//!
//! An executor repeatedly invokes an [`Operation`](crate::Operation) until it
//! reports a terminal [`Outcome`](crate::Outcome), the retry budget is spent,
//! or the [`Context`](crate::Context) ends during a pause between attempts.
//!
//! # Quick Start
//!
//! ```rust
//! use undertow::{backoff, Context, Outcome, Policy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = Policy::new(backoff::plain(Duration::from_millis(10)), 3);
//! let ctx = Context::new().with_timeout(Duration::from_secs(5));
//!
//! let mut attempts = 0;
//! let result = policy
//!     .retry_context(&ctx, |_ctx: Context| {
//!         attempts += 1;
//!         let n = attempts;
//!         async move {
//!             if n < 2 {
//!                 Outcome::recover("connection refused")
//!             } else {
//!                 Outcome::finish()
//!             }
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(result, Ok(()));
//! # });
//! ```
//!
//! # Loop rules
//!
//! - The first call happens immediately.
//! - `Finished` ends the loop with `Ok(())`, `Aborted` with its error verbatim.
//! - `Continue` is retried after the outcome's override, or the strategy's
//!   delay for the current attempt when there is none. A zero delay retries
//!   at once.
//! - Non-zero pauses race against the context; cancellation wins ties.
//!
//! # Error Types
//!
//! - [`RetryError`]: why the loop ended without success
//! - [`Member`]: one member of a joined [`RetryError`]

mod error;
mod policy;

pub use error::{Member, RetryError, RETRY_COUNT_EXCEEDED};
pub use policy::{retry, retry_blocking, run, Policy};
