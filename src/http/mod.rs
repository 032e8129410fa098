//! Retrying request/response transports.
//!
//! The module is transport-agnostic: anything implementing [`RoundTrip`]
//! can be wrapped in a [`Transport`], which retries it under a
//! [`Policy`](crate::Policy) and classifies every attempt with
//! [`classify`] (or a custom [`Classify`] implementation).
//!
//! # Example
//!
//! ```rust
//! use undertow::http::{BoxError, RoundTrip, Transport};
//! use undertow::{backoff, Context, Policy};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! /// Fails twice with 503, then answers 200.
//! struct Flaky(AtomicUsize);
//!
//! impl RoundTrip<&'static str> for Flaky {
//!     type Response = u16;
//!     type Error = BoxError;
//!
//!     async fn round_trip(&self, _ctx: &Context, _req: &&'static str) -> Result<u16, BoxError> {
//!         match self.0.fetch_add(1, Ordering::SeqCst) {
//!             0 | 1 => Ok(503),
//!             _ => Ok(200),
//!         }
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let transport = Transport::new(
//!     Flaky(AtomicUsize::new(0)),
//!     Policy::new(backoff::plain(Duration::from_millis(1)), 3),
//! );
//!
//! let status = transport.round_trip(&Context::new(), &"GET /health").await.unwrap();
//! assert_eq!(status, 200);
//! # });
//! ```

mod classify;
mod transport;

use std::future::Future;

use crate::context::Context;

pub use crate::operation::BoxError;
pub use classify::{classify, Classify, DefaultClassifier};
pub use transport::{Transport, TransportError};

/// A response that carries a status code.
pub trait Response {
    /// The status code. Zero means the transport produced no valid status.
    fn status(&self) -> u16;
}

impl Response for u16 {
    fn status(&self) -> u16 {
        *self
    }
}

impl<R: Response + ?Sized> Response for &R {
    fn status(&self) -> u16 {
        (**self).status()
    }
}

/// Sends one request and yields one response.
pub trait RoundTrip<Req>: Send + Sync {
    /// What a successful exchange produces.
    type Response;
    /// Transport failure.
    type Error;

    /// Perform a single exchange under `ctx`.
    fn round_trip(
        &self,
        ctx: &Context,
        req: &Req,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send;
}
