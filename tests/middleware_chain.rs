//! Integration tests for middleware chains driven by the bare loop.

use std::io;
use std::time::Duration;

use tokio::time::Instant;
use undertow::middleware::{boxed, layered, with_backoff, with_max_retry_count, Chain};
use undertow::testing::ScriptedOperation;
use undertow::{backoff, run, BoxError, Context, Outcome};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn eof() -> BoxError {
    Box::new(io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected EOF"))
}

#[tokio::test(start_paused = true)]
async fn budget_outside_backoff() {
    let op = ScriptedOperation::<BoxError>::repeat(3, Outcome::proceed);
    let calls = op.calls();
    let start = Instant::now();

    let err = Chain::new()
        .with(with_max_retry_count(2))
        .with(with_backoff(backoff::plain(ms(1000))))
        .retry(&Context::new(), op)
        .await
        .unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.to_string(), "retry count exceeded");
    assert_eq!(calls.get(), 3);
    assert_eq!(start.elapsed(), ms(2000));
}

#[tokio::test(start_paused = true)]
async fn budget_inside_backoff() {
    let op = ScriptedOperation::repeat(2, || Outcome::recover(eof()));
    let calls = op.calls();
    let start = Instant::now();

    let err = Chain::new()
        .with(with_backoff(backoff::plain(ms(1000))))
        .with(with_max_retry_count(1))
        .retry(&Context::new(), op)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "retry count exceeded\nunexpected EOF");
    assert_eq!(calls.get(), 2);
    assert_eq!(start.elapsed(), ms(1000));
}

#[tokio::test(start_paused = true)]
async fn operation_override_wins_over_strategy() {
    let op = ScriptedOperation::<BoxError>::new()
        .then(Outcome::retry_after(ms(300)))
        .then(Outcome::proceed())
        .then(Outcome::finish());
    let start = Instant::now();

    Chain::new()
        .with(with_max_retry_count(5))
        .with(with_backoff(backoff::arithmetic(ms(1000), ms(1000))))
        .retry(&Context::new(), op)
        .await
        .unwrap();

    // 300ms override, then the strategy's second delay
    assert_eq!(start.elapsed(), ms(2300));
}

#[tokio::test(start_paused = true)]
async fn deadline_between_attempts_keeps_last_error() {
    let ctx = Context::new().with_timeout(ms(1500));
    let op = ScriptedOperation::repeat(5, || Outcome::recover(eof()));
    let calls = op.calls();

    let err = Chain::new()
        .with(with_max_retry_count(10))
        .with(with_backoff(backoff::plain(ms(1000))))
        .retry(&ctx, op)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.to_string(), "context deadline exceeded\nunexpected EOF");
    assert_eq!(calls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn runtime_list_matches_static_chain() {
    let op = ScriptedOperation::<BoxError>::repeat(4, Outcome::proceed);
    let calls = op.calls();
    let start = Instant::now();

    let wrapped = layered(
        op,
        vec![
            boxed(with_max_retry_count(3)),
            boxed(with_backoff(backoff::fibonacci(ms(100)))),
        ],
    );
    let err = run(&Context::new(), wrapped).await.unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(calls.get(), 4);
    // 100 + 100 + 200
    assert_eq!(start.elapsed(), ms(400));
}

#[tokio::test(start_paused = true)]
async fn bare_loop_without_override_retries_immediately() {
    let op = ScriptedOperation::<BoxError>::new()
        .then(Outcome::proceed())
        .then(Outcome::proceed())
        .then(Outcome::finish());
    let calls = op.calls();
    let start = Instant::now();

    Chain::new().retry(&Context::new(), op).await.unwrap();

    assert_eq!(calls.get(), 3);
    assert_eq!(start.elapsed(), Duration::ZERO);
}
