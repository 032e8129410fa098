use std::error::Error as StdError;
use std::fmt;

use super::{BoxError, Classify, DefaultClassifier, RoundTrip};
use crate::backoff::Backoff;
use crate::context::Context;
use crate::operation::Operation;
use crate::outcome::Outcome;
use crate::retry::{Policy, RetryError};

/// Why a [`Transport`] produced no response.
#[derive(Debug)]
pub enum TransportError {
    /// The retry loop failed.
    Retry(RetryError<BoxError>),
    /// The loop succeeded, but the final attempt produced no response.
    NoResponse,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Retry(err) => write!(f, "{}", err),
            TransportError::NoResponse => f.write_str("round trip finished without a response"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TransportError::Retry(err) => err.last_error().map(|e| &**e as &(dyn StdError + 'static)),
            TransportError::NoResponse => None,
        }
    }
}

impl From<RetryError<BoxError>> for TransportError {
    fn from(err: RetryError<BoxError>) -> Self {
        TransportError::Retry(err)
    }
}

/// A [`RoundTrip`] that retries another one.
///
/// Every exchange is classified; the response of the last attempt is
/// returned once the loop finishes. A `Transport` is itself a
/// [`RoundTrip`], so transports nest.
#[derive(Debug, Clone)]
pub struct Transport<T, B, C = DefaultClassifier> {
    inner: T,
    policy: Policy<B>,
    classifier: C,
}

impl<T, B: Backoff> Transport<T, B> {
    /// Retry `inner` under `policy` with the default classifier.
    pub fn new(inner: T, policy: Policy<B>) -> Self {
        Transport {
            inner,
            policy,
            classifier: DefaultClassifier,
        }
    }
}

impl<T, B, C> Transport<T, B, C> {
    /// Replace the classifier.
    pub fn with_classifier<C2>(self, classifier: C2) -> Transport<T, B, C2> {
        Transport {
            inner: self.inner,
            policy: self.policy,
            classifier,
        }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// The retry policy.
    pub fn policy(&self) -> &Policy<B> {
        &self.policy
    }
}

impl<Req, T, B, C> RoundTrip<Req> for Transport<T, B, C>
where
    Req: Sync,
    T: RoundTrip<Req>,
    T::Response: Send,
    T::Error: Into<BoxError>,
    B: Backoff,
    C: Classify<T::Response>,
{
    type Response = T::Response;
    type Error = TransportError;

    async fn round_trip(&self, ctx: &Context, req: &Req) -> Result<T::Response, TransportError> {
        let mut last = None;

        self.policy
            .retry_context(
                ctx,
                Exchange {
                    inner: &self.inner,
                    classifier: &self.classifier,
                    req,
                    last: &mut last,
                },
            )
            .await?;

        last.ok_or(TransportError::NoResponse)
    }
}

/// One attempt of a [`Transport`]; keeps the latest response aside.
struct Exchange<'a, T, C, Req, R> {
    inner: &'a T,
    classifier: &'a C,
    req: &'a Req,
    last: &'a mut Option<R>,
}

impl<T, C, Req, R> Operation for Exchange<'_, T, C, Req, R>
where
    Req: Sync,
    T: RoundTrip<Req, Response = R>,
    T::Error: Into<BoxError>,
    C: Classify<R>,
    R: Send,
{
    type Error = BoxError;

    async fn call(&mut self, ctx: &Context) -> Outcome<BoxError> {
        match self.inner.round_trip(ctx, self.req).await {
            Ok(response) => {
                let outcome = self.classifier.classify(ctx, Ok(&response));
                *self.last = Some(response);
                outcome
            }
            Err(err) => {
                *self.last = None;
                self.classifier.classify(ctx, Err(err.into()))
            }
        }
    }
}
