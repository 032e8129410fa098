//! Integration tests for durable request processing over in-memory storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use undertow::requests::{Processor, Request};
use undertow::testing::{MemoryStorage, RequestState};
use undertow::{backoff, Context, Outcome, Policy, RETRY_COUNT_EXCEEDED};

fn policy(retry_count: u64) -> Policy<backoff::Plain> {
    Policy::new(backoff::plain(Duration::from_millis(50)), retry_count)
}

/// A downstream that rejects some payloads and flakes on others.
#[derive(Clone, Default)]
struct Downstream {
    calls: Arc<Mutex<HashMap<Vec<u8>, u32>>>,
}

impl Downstream {
    fn handle(&self, request: &Request) -> impl FnMut(Context) -> std::future::Ready<Outcome<String>> + Send {
        let calls = Arc::clone(&self.calls);
        let content = request.content.clone();
        move |_ctx: Context| {
            let mut calls = calls.lock().unwrap();
            let seen = calls.entry(content.clone()).or_insert(0);
            *seen += 1;
            let outcome = match content.as_slice() {
                b"reject" => Outcome::abort("payload rejected".to_string()),
                b"flaky" if *seen < 3 => Outcome::recover(format!("timeout #{}", seen)),
                _ => Outcome::finish(),
            };
            std::future::ready(outcome)
        }
    }

    fn calls(&self, content: &[u8]) -> u32 {
        self.calls.lock().unwrap().get(content).copied().unwrap_or(0)
    }
}

#[tokio::test(start_paused = true)]
async fn pending_requests_are_settled() {
    let processor = Processor::new(MemoryStorage::new(), policy(5));
    let ctx = Context::new();
    let ok = processor.submit(&ctx, b"ok".to_vec()).await.unwrap();
    let flaky = processor.submit(&ctx, b"flaky".to_vec()).await.unwrap();
    let reject = processor.submit(&ctx, b"reject".to_vec()).await.unwrap();
    let downstream = Downstream::default();

    let processed = processor
        .process_pending(&ctx, 2, |request| downstream.handle(request))
        .await
        .unwrap();

    assert_eq!(processed, 3);
    let storage = processor.storage();
    assert_eq!(storage.state(ok), Some(RequestState::Completed));
    assert_eq!(storage.state(flaky), Some(RequestState::Completed));
    assert_eq!(
        storage.state(reject),
        Some(RequestState::Aborted("payload rejected".to_string()))
    );

    let flaky_errors: Vec<_> = storage.attempts(flaky).into_iter().map(|a| a.error).collect();
    assert_eq!(
        flaky_errors,
        vec![
            Some("timeout #1".to_string()),
            Some("timeout #2".to_string()),
            None
        ]
    );
    assert_eq!(downstream.calls(b"flaky"), 3);
}

#[tokio::test(start_paused = true)]
async fn attempt_budget_survives_restarts() {
    let storage = Arc::new(MemoryStorage::new());
    let ctx = Context::new();

    // first process: each run gets two calls, the request allows four attempts
    let first = Processor::new(Arc::clone(&storage), policy(1)).with_max_attempts(4);
    let id = first.submit(&ctx, b"slow".to_vec()).await.unwrap();
    first
        .retry(&ctx, id, |_ctx: Context| async { Outcome::recover("busy".to_string()) })
        .await
        .unwrap();
    assert_eq!(storage.attempts(id).len(), 2);

    // an operator requeues it; a restarted process picks it up
    storage.reopen(id);
    let second = Processor::new(Arc::clone(&storage), policy(10)).with_max_attempts(4);
    let mut calls = 0;
    second
        .retry(&ctx, id, |_ctx: Context| {
            calls += 1;
            async { Outcome::recover("busy".to_string()) }
        })
        .await
        .unwrap();

    // attempts 3 and 4 are within budget, attempt 5 is not
    assert_eq!(calls, 3);
    assert_eq!(storage.attempts(id).len(), 5);
    assert_eq!(
        storage.state(id),
        Some(RequestState::Aborted(format!("{}\nbusy", RETRY_COUNT_EXCEEDED)))
    );

    // nothing is called once the budget is gone
    storage.reopen(id);
    let third = Processor::new(Arc::clone(&storage), policy(10)).with_max_attempts(4);
    let mut called = false;
    third
        .retry(&ctx, id, |_ctx: Context| {
            called = true;
            async { Outcome::<String>::finish() }
        })
        .await
        .unwrap();
    assert!(!called);
    assert_eq!(
        storage.state(id),
        Some(RequestState::Aborted(RETRY_COUNT_EXCEEDED.to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_leaves_requests_pending() {
    let processor = Processor::new(MemoryStorage::new(), policy(1));
    let ctx = Context::new();
    let first = processor.submit(&ctx, b"first".to_vec()).await.unwrap();
    let second = processor.submit(&ctx, b"second".to_vec()).await.unwrap();

    let processed = processor
        .process_pending(&ctx, 10, |_request| {
            let ctx = ctx.clone();
            move |_op_ctx: Context| {
                // the first request's success shuts the run down
                ctx.cancel();
                async { Outcome::<String>::finish() }
            }
        })
        .await
        .unwrap();

    assert_eq!(processed, 1);
    assert_eq!(processor.storage().state(first), Some(RequestState::Completed));
    assert_eq!(processor.storage().state(second), Some(RequestState::Pending));
}

#[tokio::test(start_paused = true)]
async fn storage_outage_stops_processing() {
    let processor = Processor::new(MemoryStorage::new(), policy(1));
    let ctx = Context::new();
    processor.submit(&ctx, b"a".to_vec()).await.unwrap();
    processor.storage().fail_on("storage.pending_requests");

    let err = processor
        .process_pending(&ctx, 10, |_request| |_ctx: Context| async {
            Outcome::<String>::finish()
        })
        .await
        .unwrap_err();

    assert_eq!(err.op, "storage.pending_requests");
    assert_eq!(err.to_string(), "storage.pending_requests: injected failure");
}
