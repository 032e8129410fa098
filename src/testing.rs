//! Testing utilities for code built on undertow.
//!
//! This module provides a scripted operation, an in-memory request storage
//! and assertion macros for outcomes.
//!
//! # Examples
//!
//! ## Scripted operations
//!
//! ```rust
//! use undertow::testing::ScriptedOperation;
//! use undertow::{backoff, retry, BoxError, Context, Outcome};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let op = ScriptedOperation::<BoxError>::new()
//!     .then(Outcome::recover("connection reset".into()))
//!     .then(Outcome::finish());
//! let calls = op.calls();
//!
//! let result = retry(&Context::new(), &backoff::plain(Duration::ZERO), 3, op).await;
//!
//! assert!(result.is_ok());
//! assert_eq!(calls.get(), 2);
//! # });
//! ```
//!
//! ## Assertion macros
//!
//! ```rust
//! use undertow::{assert_code, assert_outcome_eq, Code, Outcome};
//!
//! assert_outcome_eq!(Outcome::recover("eof"), Outcome::recover("eof"));
//! assert_code!(Outcome::<&str>::finish(), Code::Finished);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use uuid::Uuid;

use crate::context::{CancelCause, Context};
use crate::operation::{BoxError, Operation};
use crate::outcome::Outcome;
use crate::requests::{
    AbortedRequest, Attempt, CompletedRequest, CreatedRequest, Pagination, Request, Storage,
};

/// Shared count of calls made to a [`ScriptedOperation`].
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Calls so far.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An operation that replays a fixed list of steps.
///
/// Each step takes a simulated duration and then yields its outcome. A
/// step with a non-zero duration watches the context while it runs and
/// aborts with the context's cause if the context ends first, the way a
/// well-behaved operation would.
///
/// Calling the operation more often than scripted panics.
#[derive(Debug)]
pub struct ScriptedOperation<E> {
    steps: VecDeque<(Duration, Outcome<E>)>,
    calls: CallCounter,
}

impl<E> Default for ScriptedOperation<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ScriptedOperation<E> {
    /// An empty script.
    pub fn new() -> Self {
        ScriptedOperation {
            steps: VecDeque::new(),
            calls: CallCounter::default(),
        }
    }

    /// `count` immediate steps, each built by `step`.
    pub fn repeat<F>(count: usize, mut step: F) -> Self
    where
        F: FnMut() -> Outcome<E>,
    {
        (0..count).fold(Self::new(), |script, _| script.then(step()))
    }

    /// Append a step that returns at once.
    pub fn then(self, outcome: Outcome<E>) -> Self {
        self.then_after(Duration::ZERO, outcome)
    }

    /// Append a step that takes `duration`.
    pub fn then_after(mut self, duration: Duration, outcome: Outcome<E>) -> Self {
        self.steps.push_back((duration, outcome));
        self
    }

    /// A handle that keeps counting after the operation is moved away.
    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Steps not yet replayed.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl<E> Operation for ScriptedOperation<E>
where
    E: From<CancelCause> + Send,
{
    type Error = E;

    async fn call(&mut self, ctx: &Context) -> Outcome<E> {
        let call = self.calls.0.fetch_add(1, Ordering::SeqCst) + 1;
        let Some((duration, outcome)) = self.steps.pop_front() else {
            panic!("scripted operation called {} times, script has fewer steps", call);
        };

        if duration.is_zero() {
            return outcome;
        }

        tokio::select! {
            biased;
            cause = ctx.done() => Outcome::abort(E::from(cause)),
            _ = tokio::time::sleep(duration) => outcome,
        }
    }
}

/// Lifecycle of a request held by [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting to be processed.
    Pending,
    /// Processed successfully.
    Completed,
    /// Given up, with the recorded error.
    Aborted(String),
}

#[derive(Debug)]
struct Entry {
    content: Vec<u8>,
    state: RequestState,
    attempts: Vec<Attempt>,
}

#[derive(Debug, Default)]
struct Tables {
    order: Vec<Uuid>,
    entries: HashMap<Uuid, Entry>,
    failing: Vec<&'static str>,
}

/// A [`Storage`] kept in memory.
///
/// Calls can be made to fail with [`MemoryStorage::fail_on`], naming the
/// operation as it appears in the processor's logs (`storage.insert_attempt`
/// and so on).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    /// An empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: &'static str) {
        self.lock().failing.push(op);
    }

    /// The state of a request.
    pub fn state(&self, request_id: Uuid) -> Option<RequestState> {
        self.lock()
            .entries
            .get(&request_id)
            .map(|entry| entry.state.clone())
    }

    /// Attempts recorded for a request, oldest first.
    pub fn attempts(&self, request_id: Uuid) -> Vec<Attempt> {
        self.lock()
            .entries
            .get(&request_id)
            .map(|entry| entry.attempts.clone())
            .unwrap_or_default()
    }

    /// Put a request back into the pending state, keeping its attempts.
    pub fn reopen(&self, request_id: Uuid) {
        if let Some(entry) = self.lock().entries.get_mut(&request_id) {
            entry.state = RequestState::Pending;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // a panicking test must not poison the others
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, op: &'static str) -> Result<MutexGuard<'_, Tables>, BoxError> {
        let tables = self.lock();
        if tables.failing.contains(&op) {
            return Err("injected failure".into());
        }
        Ok(tables)
    }
}

fn not_found(request_id: Uuid) -> BoxError {
    format!("request {} not found", request_id).into()
}

impl Storage for MemoryStorage {
    async fn create_request(&self, _ctx: &Context, request: CreatedRequest) -> Result<(), BoxError> {
        let mut tables = self.check("storage.create_request")?;
        if tables.entries.contains_key(&request.request_id) {
            return Err(format!("request {} already exists", request.request_id).into());
        }
        tables.order.push(request.request_id);
        tables.entries.insert(
            request.request_id,
            Entry {
                content: request.content,
                state: RequestState::Pending,
                attempts: Vec::new(),
            },
        );
        Ok(())
    }

    async fn pending_requests(
        &self,
        _ctx: &Context,
        pagination: Pagination,
    ) -> Result<Vec<Request>, BoxError> {
        let tables = self.check("storage.pending_requests")?;
        let offset = usize::try_from(pagination.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(pagination.limit).unwrap_or(usize::MAX);

        Ok(tables
            .order
            .iter()
            .filter_map(|id| tables.entries.get(id).map(|entry| (id, entry)))
            .filter(|(_, entry)| entry.state == RequestState::Pending)
            .skip(offset)
            .take(limit)
            .map(|(id, entry)| Request {
                request_id: *id,
                content: entry.content.clone(),
            })
            .collect())
    }

    async fn last_attempt_number(&self, _ctx: &Context, request_id: Uuid) -> Result<u64, BoxError> {
        let tables = self.check("storage.last_attempt_number")?;
        Ok(tables
            .entries
            .get(&request_id)
            .map_or(0, |entry| entry.attempts.len() as u64))
    }

    async fn insert_attempt(&self, _ctx: &Context, attempt: Attempt) -> Result<u64, BoxError> {
        let mut tables = self.check("storage.insert_attempt")?;
        let entry = tables
            .entries
            .get_mut(&attempt.request_id)
            .ok_or_else(|| not_found(attempt.request_id))?;
        entry.attempts.push(attempt);
        Ok(entry.attempts.len() as u64)
    }

    async fn mark_aborted(&self, _ctx: &Context, request: AbortedRequest) -> Result<(), BoxError> {
        let mut tables = self.check("storage.mark_aborted")?;
        let entry = tables
            .entries
            .get_mut(&request.request_id)
            .ok_or_else(|| not_found(request.request_id))?;
        entry.state = RequestState::Aborted(request.error);
        Ok(())
    }

    async fn mark_completed(&self, _ctx: &Context, request: CompletedRequest) -> Result<(), BoxError> {
        let mut tables = self.check("storage.mark_completed")?;
        let entry = tables
            .entries
            .get_mut(&request.request_id)
            .ok_or_else(|| not_found(request.request_id))?;
        entry.state = RequestState::Completed;
        Ok(())
    }
}

/// Assert that two outcomes are equal, reporting the first differing field.
///
/// # Example
///
/// ```rust
/// use undertow::{assert_outcome_eq, Outcome};
/// use std::time::Duration;
///
/// assert_outcome_eq!(
///     Outcome::recover_after("eof", Duration::from_secs(1)),
///     Outcome::recover("eof").with_retry_after(Duration::from_secs(1))
/// );
/// ```
#[macro_export]
macro_rules! assert_outcome_eq {
    ($left:expr, $right:expr) => {
        match $crate::Outcome::compare(&$left, &$right) {
            Ok(()) => {}
            Err(mismatch) => panic!("outcomes differ: {}", mismatch),
        }
    };
}

/// Assert that an outcome has the given code.
///
/// # Example
///
/// ```rust
/// use undertow::{assert_code, Code, Outcome};
///
/// assert_code!(Outcome::abort("bad request"), Code::Aborted);
/// ```
#[macro_export]
macro_rules! assert_code {
    ($outcome:expr, $code:expr) => {{
        let actual = $crate::Outcome::code(&$outcome);
        let expected: $crate::Code = $code;
        if actual != expected {
            panic!("expected code {}, got {}", expected, actual);
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Code;
    use chrono::Utc;

    fn created(content: &[u8]) -> CreatedRequest {
        CreatedRequest {
            request_id: Uuid::new_v4(),
            content: content.to_vec(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scripted_operation_replays_in_order() {
        let mut op = ScriptedOperation::<BoxError>::new()
            .then(Outcome::proceed())
            .then(Outcome::finish());
        let calls = op.calls();
        let ctx = Context::new();

        assert_code!(op.call(&ctx).await, Code::Continue);
        assert_code!(op.call(&ctx).await, Code::Finished);
        assert_eq!(calls.get(), 2);
        assert_eq!(op.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_step_aborts_with_context_cause() {
        let mut op = ScriptedOperation::<BoxError>::new()
            .then_after(Duration::from_secs(10), Outcome::finish());
        let ctx = Context::new().with_timeout(Duration::from_secs(1));

        let outcome = op.call(&ctx).await;

        assert_code!(outcome, Code::Aborted);
        assert_eq!(
            outcome.error().map(ToString::to_string),
            Some("context deadline exceeded".to_string())
        );
    }

    #[tokio::test]
    #[should_panic(expected = "scripted operation called 1 times")]
    async fn test_scripted_operation_panics_past_script() {
        let mut op = ScriptedOperation::<BoxError>::new();
        op.call(&Context::new()).await;
    }

    #[test]
    #[should_panic(expected = "compare 'err', original: eof, other: reset")]
    fn test_assert_outcome_eq_reports_field() {
        assert_outcome_eq!(Outcome::recover("eof"), Outcome::recover("reset"));
    }

    #[test]
    #[should_panic(expected = "expected code finished, got continue")]
    fn test_assert_code_panics() {
        assert_code!(Outcome::<&str>::proceed(), Code::Finished);
    }

    #[tokio::test]
    async fn test_memory_storage_lifecycle() {
        let storage = MemoryStorage::new();
        let ctx = Context::new();
        let request = created(b"a");
        let id = request.request_id;

        storage.create_request(&ctx, request.clone()).await.unwrap();
        assert!(storage.create_request(&ctx, request).await.is_err());
        assert_eq!(storage.last_attempt_number(&ctx, id).await.unwrap(), 0);

        let attempt = Attempt {
            request_id: id,
            error: Some("eof".to_string()),
            created_at: Utc::now(),
        };
        assert_eq!(storage.insert_attempt(&ctx, attempt.clone()).await.unwrap(), 1);
        assert_eq!(storage.insert_attempt(&ctx, attempt).await.unwrap(), 2);
        assert_eq!(storage.last_attempt_number(&ctx, id).await.unwrap(), 2);

        let completed = CompletedRequest {
            request_id: id,
            completed_at: Utc::now(),
        };
        storage.mark_completed(&ctx, completed).await.unwrap();
        assert_eq!(storage.state(id), Some(RequestState::Completed));
        assert_eq!(storage.attempts(id).len(), 2);
    }

    #[tokio::test]
    async fn test_memory_storage_pagination_skips_finished() {
        let storage = MemoryStorage::new();
        let ctx = Context::new();
        let mut ids = Vec::new();
        for content in [b"a", b"b", b"c", b"d"] {
            let request = created(content);
            ids.push(request.request_id);
            storage.create_request(&ctx, request).await.unwrap();
        }
        let aborted = AbortedRequest {
            request_id: ids[1],
            aborted_at: Utc::now(),
            error: "rejected".to_string(),
        };
        storage.mark_aborted(&ctx, aborted).await.unwrap();

        let page = storage
            .pending_requests(&ctx, Pagination { offset: 1, limit: 5 })
            .await
            .unwrap();

        let contents: Vec<_> = page.into_iter().map(|r| r.content).collect();
        assert_eq!(contents, vec![b"c".to_vec(), b"d".to_vec()]);
    }

    #[tokio::test]
    async fn test_memory_storage_injected_failure() {
        let storage = MemoryStorage::new();
        storage.fail_on("storage.create_request");

        let err = storage
            .create_request(&Context::new(), created(b"x"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "injected failure");
    }

    #[tokio::test]
    async fn test_memory_storage_unknown_request() {
        let storage = MemoryStorage::new();
        let attempt = Attempt {
            request_id: Uuid::nil(),
            error: None,
            created_at: Utc::now(),
        };

        let err = storage.insert_attempt(&Context::new(), attempt).await.unwrap_err();

        assert!(err.to_string().contains("not found"));
    }
}
