use std::fmt;
use std::future::Future;

use chrono::Utc;
use tracing::Instrument as _;
use uuid::Uuid;

use super::{AbortedRequest, Attempt, CompletedRequest, CreatedRequest, Pagination, Request};
use super::{RequestError, Storage};
use crate::backoff::Backoff;
use crate::context::Context;
use crate::operation::{BoxError, Operation};
use crate::outcome::Outcome;
use crate::retry::{Policy, RETRY_COUNT_EXCEEDED};

const CREATE_REQUEST: &str = "storage.create_request";
const PENDING_REQUESTS: &str = "storage.pending_requests";
const LAST_ATTEMPT_NUMBER: &str = "storage.last_attempt_number";
const INSERT_ATTEMPT: &str = "storage.insert_attempt";
const MARK_ABORTED: &str = "storage.mark_aborted";
const MARK_COMPLETED: &str = "storage.mark_completed";

/// Retries requests kept in a [`Storage`].
///
/// # Example
///
/// ```rust
/// use undertow::requests::Processor;
/// use undertow::testing::{MemoryStorage, RequestState};
/// use undertow::{backoff, Context, Outcome, Policy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let processor = Processor::new(
///     MemoryStorage::new(),
///     Policy::new(backoff::plain(Duration::from_millis(1)), 3),
/// );
/// let ctx = Context::new();
///
/// let id = processor.submit(&ctx, b"charge card 42".to_vec()).await.unwrap();
/// processor
///     .retry(&ctx, id, |_ctx: Context| async { Outcome::<String>::finish() })
///     .await
///     .unwrap();
///
/// assert_eq!(processor.storage().state(id), Some(RequestState::Completed));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Processor<S, B> {
    storage: S,
    policy: Policy<B>,
    max_attempts: Option<u64>,
}

impl<S: Storage, B: Backoff> Processor<S, B> {
    /// A processor without an attempt budget.
    pub fn new(storage: S, policy: Policy<B>) -> Self {
        Processor {
            storage,
            policy,
            max_attempts: None,
        }
    }

    /// Abort requests once more than `max_attempts` attempts were recorded
    /// for them, counting earlier runs.
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Store a new pending request and return its id.
    pub async fn submit(&self, ctx: &Context, content: Vec<u8>) -> Result<Uuid, RequestError> {
        let request = CreatedRequest {
            request_id: Uuid::new_v4(),
            content,
            created_at: Utc::now(),
        };
        let request_id = request.request_id;
        let span = tracing::info_span!("request", %request_id);

        logged(CREATE_REQUEST, self.storage.create_request(ctx, request))
            .instrument(span)
            .await?;

        Ok(request_id)
    }

    /// Run `op` for the stored request `request_id` and record how it ended.
    ///
    /// The request is marked completed when the retry loop succeeds and
    /// aborted otherwise. Only storage failures are returned; the
    /// operation's own failure is persisted, not propagated.
    pub async fn retry<O>(&self, ctx: &Context, request_id: Uuid, op: O) -> Result<(), RequestError>
    where
        O: Operation,
        O::Error: fmt::Display,
    {
        let span = tracing::info_span!(
            "request",
            %request_id,
            max_attempts = ?self.max_attempts,
        );

        self.retry_request(ctx, request_id, op).instrument(span).await
    }

    async fn retry_request<O>(&self, ctx: &Context, request_id: Uuid, op: O) -> Result<(), RequestError>
    where
        O: Operation,
        O::Error: fmt::Display,
    {
        let last_attempt_number = logged(
            LAST_ATTEMPT_NUMBER,
            self.storage.last_attempt_number(ctx, request_id),
        )
        .await?;

        if self.exceeded(last_attempt_number) {
            tracing::error!(
                op = "check_retry_exceeded",
                attempt_number = last_attempt_number,
                error = RETRY_COUNT_EXCEEDED,
                "retry count exceeded"
            );
            return self
                .mark_aborted(ctx, request_id, RETRY_COUNT_EXCEEDED.to_string())
                .await;
        }

        let recorded = Recorded {
            inner: op,
            storage: &self.storage,
            request_id,
            max_attempts: self.max_attempts,
        };

        match self.policy.retry_context(ctx, recorded).await {
            Ok(()) => {
                let completed = CompletedRequest {
                    request_id,
                    completed_at: Utc::now(),
                };
                logged(MARK_COMPLETED, self.storage.mark_completed(ctx, completed)).await
            }
            Err(err) => self.mark_aborted(ctx, request_id, err.to_string()).await,
        }
    }

    /// Retry every pending request, `page_size` at a time, with an
    /// operation built by `handler`. Returns the number of requests
    /// processed.
    ///
    /// Stops early, without error, once `ctx` is done.
    pub async fn process_pending<F, O>(
        &self,
        ctx: &Context,
        page_size: u64,
        mut handler: F,
    ) -> Result<usize, RequestError>
    where
        F: FnMut(&Request) -> O,
        O: Operation,
        O::Error: fmt::Display,
    {
        let mut processed = 0;

        while !ctx.is_done() {
            // processed requests leave the pending set, so the first page
            // always holds the next batch
            let pagination = Pagination {
                offset: 0,
                limit: page_size,
            };
            let page = logged(PENDING_REQUESTS, self.storage.pending_requests(ctx, pagination)).await?;
            let last_page = (page.len() as u64) < page_size;

            for request in &page {
                if ctx.is_done() {
                    return Ok(processed);
                }
                self.retry(ctx, request.request_id, handler(request)).await?;
                processed += 1;
            }

            if page.is_empty() || last_page {
                break;
            }
        }

        Ok(processed)
    }

    async fn mark_aborted(&self, ctx: &Context, request_id: Uuid, error: String) -> Result<(), RequestError> {
        let aborted = AbortedRequest {
            request_id,
            aborted_at: Utc::now(),
            error,
        };
        logged(MARK_ABORTED, self.storage.mark_aborted(ctx, aborted)).await
    }

    fn exceeded(&self, attempt_number: u64) -> bool {
        exceeded(self.max_attempts, attempt_number)
    }
}

fn exceeded(max_attempts: Option<u64>, attempt_number: u64) -> bool {
    max_attempts.is_some_and(|max| attempt_number > max)
}

/// Await a storage call between `started` and `finished`/`failed` events.
async fn logged<T, F>(op: &'static str, call: F) -> Result<T, RequestError>
where
    F: Future<Output = Result<T, BoxError>>,
{
    tracing::info!(op = op, "started");

    match call.await {
        Ok(value) => {
            tracing::info!(op = op, "finished");
            Ok(value)
        }
        Err(source) => {
            tracing::error!(op = op, error = %source, "failed");
            Err(RequestError::new(op, source))
        }
    }
}

/// Records every attempt of the wrapped operation.
struct Recorded<'a, O, S> {
    inner: O,
    storage: &'a S,
    request_id: Uuid,
    max_attempts: Option<u64>,
}

impl<O, S> Operation for Recorded<'_, O, S>
where
    O: Operation,
    O::Error: fmt::Display,
    S: Storage,
{
    type Error = O::Error;

    async fn call(&mut self, ctx: &Context) -> Outcome<O::Error> {
        let outcome = self.inner.call(ctx).await;

        let attempt = Attempt {
            request_id: self.request_id,
            error: outcome.error().map(ToString::to_string),
            created_at: Utc::now(),
        };

        let attempt_number = match logged(INSERT_ATTEMPT, self.storage.insert_attempt(ctx, attempt)).await {
            Ok(number) => number,
            // an unrecorded attempt does not stop the loop
            Err(_) => return outcome,
        };

        if exceeded(self.max_attempts, attempt_number) {
            tracing::error!(
                op = INSERT_ATTEMPT,
                attempt_number,
                error = RETRY_COUNT_EXCEEDED,
                "retry count exceeded"
            );
            return Outcome::exhausted(outcome.into_error());
        }

        tracing::debug!(op = INSERT_ATTEMPT, attempt_number, code = %outcome.code(), "attempt recorded");
        outcome
    }
}
