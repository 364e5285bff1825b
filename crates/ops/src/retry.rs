// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded retry for transient network failures.
//!
//! Remote operations (ssh, scp, git transport, streamed tar) fail in
//! recoverable ways that surface as well-known message fragments. The
//! predicate here is deliberately a fixed string set; authentication
//! failures are never transient.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::subprocess::CmdError;

/// Maximum attempts per operation (first try included).
pub const MAX_ATTEMPTS: u32 = 3;

const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "operation timed out",
    "i/o timeout",
    "temporary failure",
];

/// Whether an error message matches the recoverable set.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{op} cancelled")]
    Cancelled { op: String },

    #[error("{op} failed after {attempts} attempts: {source}")]
    Exhausted {
        op: String,
        attempts: u32,
        #[source]
        source: CmdError,
    },

    #[error(transparent)]
    Fatal(CmdError),
}

/// Run `attempt` up to [`MAX_ATTEMPTS`] times with 1s/2s/4s backoff.
///
/// Timeouts count as transient (a bounded deadline elapsing on a remote
/// call is indistinguishable from a network stall). A cancelled token
/// aborts immediately, including mid-backoff. Non-transient errors
/// return on the first attempt, untouched.
pub async fn retry_transient<T, F, Fut>(
    op: &str,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CmdError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if matches!(err, CmdError::Cancelled { .. }) || cancel.is_cancelled() {
            return Err(RetryError::Cancelled { op: op.to_string() });
        }

        let transient = matches!(err, CmdError::Timeout { .. }) || is_transient(&err.retry_text());
        if !transient {
            return Err(RetryError::Fatal(err));
        }
        if tries >= MAX_ATTEMPTS {
            return Err(RetryError::Exhausted { op: op.to_string(), attempts: tries, source: err });
        }

        let backoff = Duration::from_secs(1 << (tries - 1));
        warn!(op, attempt = tries, ?backoff, error = %err, "transient failure, retrying");
        tokio::select! {
            () = cancel.cancelled() => return Err(RetryError::Cancelled { op: op.to_string() }),
            () = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
