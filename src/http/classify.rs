//! Mapping an exchange's result to an [`Outcome`].

use std::error::Error as StdError;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{BoxError, Response};
use crate::context::Context;
use crate::outcome::Outcome;

// Transport errors are rarely typed, so permanent failures are recognised
// by their messages.
static REDIRECTS_EXHAUSTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"stopped after \d+ redirects\z").expect("redirect pattern is valid")
});

static MISSING_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"missing protocol scheme").expect("missing scheme pattern is valid")
});

static UNSUPPORTED_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"unsupported (protocol|URL) scheme").expect("scheme pattern is valid")
});

static INVALID_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"invalid (HTTP )?header").expect("header pattern is valid")
});

static CERTIFICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)certificate (verify failed|is not trusted|has expired)|invalid peer certificate|unknown ?issuer",
    )
    .expect("certificate pattern is valid")
});

const TOO_MANY_REQUESTS: u16 = 429;
const NOT_IMPLEMENTED: u16 = 501;

/// Decides what the retry loop does after one exchange.
pub trait Classify<R>: Send + Sync {
    /// Classify the response, or the transport error.
    fn classify(&self, ctx: &Context, result: Result<&R, BoxError>) -> Outcome<BoxError>;
}

impl<R, F> Classify<R> for F
where
    F: Fn(&Context, Result<&R, BoxError>) -> Outcome<BoxError> + Send + Sync,
{
    fn classify(&self, ctx: &Context, result: Result<&R, BoxError>) -> Outcome<BoxError> {
        self(ctx, result)
    }
}

/// The classifier used when none is configured; delegates to [`classify`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<R: Response> Classify<R> for DefaultClassifier {
    fn classify(&self, ctx: &Context, result: Result<&R, BoxError>) -> Outcome<BoxError> {
        classify(ctx, result)
    }
}

/// The default rule.
///
/// - transport errors caused by too many redirects, a missing or unsupported
///   scheme, an invalid header, or a rejected certificate abort;
/// - other transport errors are recovered;
/// - 429, 0 and 5xx other than 501 continue;
/// - everything else finishes.
///
/// ```rust
/// use undertow::http::classify;
/// use undertow::{Code, Context};
///
/// let ctx = Context::new();
/// assert_eq!(classify(&ctx, Ok(&503u16)).code(), Code::Continue);
/// assert_eq!(classify(&ctx, Ok(&501u16)).code(), Code::Finished);
/// assert_eq!(classify(&ctx, Ok(&404u16)).code(), Code::Finished);
/// assert_eq!(classify::<u16>(&ctx, Err("missing protocol scheme".into())).code(), Code::Aborted);
/// ```
pub fn classify<R: Response>(_ctx: &Context, result: Result<&R, BoxError>) -> Outcome<BoxError> {
    let response = match result {
        Ok(response) => response,
        Err(err) if is_permanent(&*err) => return Outcome::abort(err),
        Err(err) => return Outcome::recover(err),
    };

    match response.status() {
        TOO_MANY_REQUESTS => Outcome::proceed(),
        NOT_IMPLEMENTED => Outcome::finish(),
        status if status == 0 || status >= 500 => Outcome::proceed(),
        _ => Outcome::finish(),
    }
}

/// True if any error in the source chain is known not to heal on retry.
fn is_permanent(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        let message = err.to_string();
        if [
            &*REDIRECTS_EXHAUSTED,
            &*MISSING_SCHEME,
            &*UNSUPPORTED_SCHEME,
            &*INVALID_HEADER,
            &*CERTIFICATE,
        ]
        .iter()
        .any(|re| re.is_match(&message))
        {
            return true;
        }
        current = err.source();
    }
    false
}
