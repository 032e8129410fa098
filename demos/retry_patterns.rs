//! Retry Patterns Example
//!
//! Walks through the ways undertow is typically used: a policy around a
//! flaky call, per-attempt overrides, middleware chains, deadlines and
//! durable requests with structured logs.
//!
//! Run with: cargo run --example retry_patterns

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use undertow::middleware::{with_backoff, with_max_retry_count, Chain};
use undertow::requests::Processor;
use undertow::testing::MemoryStorage;
use undertow::{backoff, BoxError, Context, Outcome, Policy, RetryError};

// ============================================================================
// Policy around a flaky call
// ============================================================================

/// Fails `failures` times with a connection error, then succeeds.
fn flaky(failures: u32) -> impl FnMut(Context) -> std::future::Ready<Outcome<BoxError>> + Send {
    let mut calls = 0;
    move |_ctx: Context| {
        calls += 1;
        let outcome: Outcome<BoxError> = if calls <= failures {
            Outcome::recover(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into())
        } else {
            Outcome::finish()
        };
        std::future::ready(outcome)
    }
}

async fn policy_example() {
    println!("\n=== Policy ===");

    let policy = Policy::new(backoff::exponential(Duration::from_millis(20)), 4);
    for attempt in 0..policy.retry_count() {
        println!("  retry {} waits {:?}", attempt, policy.delay_for_attempt(attempt));
    }

    match policy.retry_context(&Context::new(), flaky(2)).await {
        Ok(()) => println!("  succeeded after two resets"),
        Err(err) => println!("  failed: {}", err),
    }

    match policy.retry_context(&Context::new(), flaky(10)).await {
        Ok(()) => println!("  unexpected success"),
        Err(err) => println!("  gave up: {:?}", err.to_string()),
    }
}

// ============================================================================
// Overrides chosen by the operation
// ============================================================================

async fn override_example() {
    println!("\n=== Overrides ===");

    let mut calls = 0;
    let result = undertow::retry(
        &Context::new(),
        &backoff::plain(Duration::from_secs(10)),
        3,
        |_ctx: Context| {
            calls += 1;
            let n = calls;
            async move {
                match n {
                    // the server sent a Retry-After hint
                    1 => Outcome::retry_after(Duration::from_millis(30)),
                    // a stale cache entry: try again right away
                    2 => Outcome::recover_after("stale entry", Duration::ZERO),
                    _ => Outcome::finish(),
                }
            }
        },
    )
    .await;

    println!("  {} calls, result {:?}", calls, result);
}

// ============================================================================
// Middleware chains
// ============================================================================

async fn chain_example() {
    println!("\n=== Middleware ===");

    let result = Chain::new()
        .with(with_max_retry_count(3))
        .with(with_backoff(backoff::fibonacci(Duration::from_millis(10))))
        .retry(&Context::new(), flaky(5))
        .await;

    match result {
        Err(RetryError::Exhausted { last: Some(err) }) => {
            println!("  budget spent, last error: {}", err)
        }
        other => println!("  unexpected: {:?}", other),
    }
}

// ============================================================================
// Deadlines
// ============================================================================

async fn deadline_example() {
    println!("\n=== Deadline ===");

    let ctx = Context::new().with_timeout(Duration::from_millis(100));
    let policy = Policy::new(backoff::plain(Duration::from_millis(40)), 100);

    let result = policy
        .retry_context(&ctx, |_ctx: Context| async {
            Outcome::recover("upstream busy")
        })
        .await;

    if let Err(err) = result {
        println!("  cancelled: {}", err.is_cancelled());
        for member in err.errors() {
            println!("  - {:?}", member);
        }
    }
}

// ============================================================================
// Durable requests
// ============================================================================

async fn requests_example() {
    println!("\n=== Durable requests ===");

    let processor = Processor::new(
        MemoryStorage::new(),
        Policy::new(backoff::plain(Duration::from_millis(5)), 2),
    )
    .with_max_attempts(5);
    let ctx = Context::new();

    for payload in ["invoice-1", "invoice-2", "invoice-3"] {
        if let Err(err) = processor.submit(&ctx, payload.as_bytes().to_vec()).await {
            println!("  submit failed: {}", err);
        }
    }

    let failures = Arc::new(AtomicU32::new(0));
    let processed = processor
        .process_pending(&ctx, 2, |request| {
            let failures = Arc::clone(&failures);
            let reject = request.content == b"invoice-2";
            move |_ctx: Context| {
                let outcome = if reject {
                    failures.fetch_add(1, Ordering::SeqCst);
                    Outcome::abort("invoice rejected".to_string())
                } else {
                    Outcome::finish()
                };
                std::future::ready(outcome)
            }
        })
        .await;

    println!(
        "  processed {:?}, rejected {}",
        processed,
        failures.load(Ordering::SeqCst)
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("Undertow retry patterns");
    println!("=======================");

    policy_example().await;
    override_example().await;
    chain_example().await;
    deadline_example().await;
    requests_example().await;

    println!("\nDone.");
}
