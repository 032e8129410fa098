//! Durable request processing.
//!
//! A [`Processor`] retries requests whose state lives in a [`Storage`]:
//! every attempt is recorded, an attempt budget can be enforced across
//! process restarts, and each request ends up either completed or aborted.
//!
//! Storage calls are logged through `tracing` as `started`, `finished` and
//! `failed` events carrying an `op` field; the events of one request share a
//! `request` span with its `request_id`.

mod processor;

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::Context;
use crate::operation::BoxError;

pub use processor::Processor;

/// A request as it is first stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRequest {
    /// Identifier assigned on submission.
    pub request_id: Uuid,
    /// Opaque payload.
    pub content: Vec<u8>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// A pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Identifier.
    pub request_id: Uuid,
    /// Opaque payload.
    pub content: Vec<u8>,
}

/// Terminal failure record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedRequest {
    /// Identifier.
    pub request_id: Uuid,
    /// When the request was given up.
    pub aborted_at: DateTime<Utc>,
    /// Rendered error.
    pub error: String,
}

/// Terminal success record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    /// Identifier.
    pub request_id: Uuid,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Identifier of the request.
    pub request_id: Uuid,
    /// Rendered error of the attempt's outcome, if any.
    pub error: Option<String>,
    /// When the attempt ended.
    pub created_at: DateTime<Utc>,
}

/// A page of pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    /// Requests to skip.
    pub offset: u64,
    /// Maximum page length.
    pub limit: u64,
}

/// Persistence for request state.
///
/// Attempt numbers start at 1 and count every attempt ever recorded for a
/// request; `last_attempt_number` is 0 for a request without attempts.
pub trait Storage: Send + Sync {
    /// Store a new pending request.
    fn create_request(
        &self,
        ctx: &Context,
        request: CreatedRequest,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Pending requests, oldest first.
    fn pending_requests(
        &self,
        ctx: &Context,
        pagination: Pagination,
    ) -> impl Future<Output = Result<Vec<Request>, BoxError>> + Send;

    /// Number of the latest recorded attempt.
    fn last_attempt_number(
        &self,
        ctx: &Context,
        request_id: Uuid,
    ) -> impl Future<Output = Result<u64, BoxError>> + Send;

    /// Record an attempt, returning its number.
    fn insert_attempt(
        &self,
        ctx: &Context,
        attempt: Attempt,
    ) -> impl Future<Output = Result<u64, BoxError>> + Send;

    /// Move a request to the aborted state.
    fn mark_aborted(
        &self,
        ctx: &Context,
        request: AbortedRequest,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Move a request to the completed state.
    fn mark_completed(
        &self,
        ctx: &Context,
        request: CompletedRequest,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn create_request(
        &self,
        ctx: &Context,
        request: CreatedRequest,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).create_request(ctx, request)
    }

    fn pending_requests(
        &self,
        ctx: &Context,
        pagination: Pagination,
    ) -> impl Future<Output = Result<Vec<Request>, BoxError>> + Send {
        (**self).pending_requests(ctx, pagination)
    }

    fn last_attempt_number(
        &self,
        ctx: &Context,
        request_id: Uuid,
    ) -> impl Future<Output = Result<u64, BoxError>> + Send {
        (**self).last_attempt_number(ctx, request_id)
    }

    fn insert_attempt(
        &self,
        ctx: &Context,
        attempt: Attempt,
    ) -> impl Future<Output = Result<u64, BoxError>> + Send {
        (**self).insert_attempt(ctx, attempt)
    }

    fn mark_aborted(
        &self,
        ctx: &Context,
        request: AbortedRequest,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).mark_aborted(ctx, request)
    }

    fn mark_completed(
        &self,
        ctx: &Context,
        request: CompletedRequest,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).mark_completed(ctx, request)
    }
}

/// A storage call failed.
#[derive(Debug)]
pub struct RequestError {
    /// The failing storage operation, e.g. `storage.mark_aborted`.
    pub op: &'static str,
    /// The storage's error.
    pub source: BoxError,
}

impl RequestError {
    pub(crate) fn new(op: &'static str, source: BoxError) -> Self {
        RequestError { op, source }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.source)
    }
}

impl StdError for RequestError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}
