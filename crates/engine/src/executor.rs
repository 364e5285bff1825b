// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight reconcile gate with trigger coalescing.
//!
//! State machine on `(running, pending)`: a trigger while idle starts a
//! run; a trigger during a run sets the dirty flag and remembers only
//! the *latest* source. When a run finishes with the flag set, exactly
//! one follow-up starts. There is no queue; reconciles are idempotent
//! over repo state, so collapsing a burst loses nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use keel_core::ReconcileRequest;

use crate::error::ReconcileError;

/// What a finished run reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Repo already at the deployed commit; nothing to do.
    Unchanged { commit: String },
    /// A deploy ran to completion.
    Deployed { commit: String, target: String },
}

/// The executor's view of the reconciler.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError>;
}

/// What a trigger call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new run was started for this trigger.
    Started,
    /// A run was in flight; this trigger was folded into the pending flag.
    Coalesced,
}

#[derive(Default)]
struct Flight {
    running: bool,
    pending: bool,
    pending_source: Option<String>,
}

/// Fresh bounded context per background run. A triggering client's
/// disconnect must never abort an in-flight deploy, so runs get their
/// own deadline instead of inheriting a request context.
const RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

struct Inner<R: Reconcile + 'static> {
    reconciler: Arc<R>,
    flight: Mutex<Flight>,
    shutdown: CancellationToken,
    run_timeout: Duration,
}

pub struct Executor<R: Reconcile + 'static> {
    inner: Arc<Inner<R>>,
}

impl<R: Reconcile + 'static> Executor<R> {
    pub fn new(reconciler: Arc<R>, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                reconciler,
                flight: Mutex::new(Flight::default()),
                shutdown,
                run_timeout: RUN_TIMEOUT,
            }),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_with_timeout(
        reconciler: Arc<R>,
        shutdown: CancellationToken,
        run_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                reconciler,
                flight: Mutex::new(Flight::default()),
                shutdown,
                run_timeout,
            }),
        })
    }

    /// Whether a run is executing right now.
    pub fn is_running(&self) -> bool {
        self.inner.flight.lock().running
    }

    /// Request a reconcile. Never blocks on the run itself.
    pub fn trigger(&self, source: impl Into<String>) -> TriggerOutcome {
        let source = source.into();
        {
            let mut flight = self.inner.flight.lock();
            if flight.running {
                // Coalesce: only the latest source is kept.
                flight.pending = true;
                flight.pending_source = Some(source.clone());
                drop(flight);
                info!(source, "reconcile already running, trigger coalesced");
                return TriggerOutcome::Coalesced;
            }
            flight.running = true;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_loop(inner, source));
        TriggerOutcome::Started
    }

    /// Wait until the current run (and any pending follow-up) drains,
    /// or the deadline passes. Used by graceful shutdown.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let poll = Duration::from_millis(50);
        let give_up = tokio::time::Instant::now() + deadline;
        while self.is_running() {
            if tokio::time::Instant::now() >= give_up {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
        true
    }
}

/// Run until the pending flag stays clear. The `(running, pending)`
/// pair is only touched under the mutex, never across an await.
async fn run_loop<R: Reconcile + 'static>(inner: Arc<Inner<R>>, mut source: String) {
    loop {
        if inner.shutdown.is_cancelled() {
            let mut flight = inner.flight.lock();
            flight.running = false;
            flight.pending = false;
            flight.pending_source = None;
            return;
        }

        let request = ReconcileRequest::new(source.clone());
        let cancel = inner.shutdown.child_token();
        let run =
            tokio::time::timeout(inner.run_timeout, inner.reconciler.reconcile(&request, &cancel))
                .await;
        match run {
            Ok(Ok(outcome)) => info!(source, ?outcome, "reconcile finished"),
            Ok(Err(err)) => error!(source, error = %err, kind = err.kind(), "reconcile failed"),
            Err(_) => {
                cancel.cancel();
                warn!(source, timeout = ?inner.run_timeout, "reconcile timed out");
            }
        }

        let mut flight = inner.flight.lock();
        if flight.pending && !inner.shutdown.is_cancelled() {
            flight.pending = false;
            source = flight.pending_source.take().unwrap_or_else(|| "coalesced".to_string());
            // Restart immediately with the latest source; running stays true.
            continue;
        }
        flight.running = false;
        flight.pending = false;
        flight.pending_source = None;
        return;
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
