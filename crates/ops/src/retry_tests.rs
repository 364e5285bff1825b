// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn transient_err() -> CmdError {
    CmdError::Failed { program: "ssh".into(), code: 255, stderr: "Connection refused".into() }
}

fn fatal_err() -> CmdError {
    CmdError::Failed { program: "ssh".into(), code: 255, stderr: "Permission denied".into() }
}

#[yare::parameterized(
    refused = { "ssh: connect to host tower: Connection refused", true },
    reset = { "read: CONNECTION RESET by peer", true },
    unreachable = { "Network is unreachable", true },
    no_route = { "No route to host", true },
    host_down = { "Host is down", true },
    op_timeout = { "Operation timed out", true },
    io_timeout = { "dial tcp: i/o timeout", true },
    temp_failure = { "Temporary failure in name resolution", true },
    auth = { "Permission denied (publickey)", false },
    host_key = { "Host key verification failed", false },
    generic = { "No such file or directory", false },
)]
fn transient_predicate(message: &str, expected: bool) {
    assert_eq!(is_transient(message), expected);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_retry_then_succeed() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let result = retry_transient("push", &CancellationToken::new(), move || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient_err())
            } else {
                Ok(42u32)
            }
        }
    })
    .await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_reports_attempt_count() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let err = retry_transient("push", &CancellationToken::new(), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(transient_err()) }
    })
    .await
    .unwrap_err();
    assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }), "got: {err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
}

#[tokio::test]
async fn fatal_errors_return_on_first_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let err = retry_transient("push", &CancellationToken::new(), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(fatal_err()) }
    })
    .await
    .unwrap_err();
    assert!(matches!(err, RetryError::Fatal(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_aborts_backoff() {
    let cancel = CancellationToken::new();
    let cancel_inside = cancel.clone();
    let err = retry_transient("push", &cancel, move || {
        // Cancel after the first failure so the backoff sleep is interrupted.
        cancel_inside.cancel();
        async { Err::<(), _>(transient_err()) }
    })
    .await
    .unwrap_err();
    assert!(matches!(err, RetryError::Cancelled { .. }));
}
