// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// Reconciler driven by the test: each run announces itself on
/// `started`, then blocks until the test sends a release on `gate`.
struct GatedReconciler {
    started: mpsc::UnboundedSender<String>,
    gate: AsyncMutex<mpsc::UnboundedReceiver<()>>,
    runs: AtomicUsize,
    sources: parking_lot::Mutex<Vec<String>>,
}

impl GatedReconciler {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<()>) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = mpsc::unbounded_channel();
        let reconciler = Arc::new(Self {
            started: started_tx,
            gate: AsyncMutex::new(gate_rx),
            runs: AtomicUsize::new(0),
            sources: parking_lot::Mutex::new(Vec::new()),
        });
        (reconciler, started_rx, gate_tx)
    }

    fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }
}

#[async_trait]
impl Reconcile for GatedReconciler {
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().push(request.source.clone());
        let _ = self.started.send(request.source.clone());
        let mut gate = self.gate.lock().await;
        tokio::select! {
            _ = gate.recv() => {}
            () = cancel.cancelled() => {}
        }
        Ok(Outcome::Unchanged { commit: "abc123".into() })
    }
}

#[tokio::test]
async fn idle_trigger_starts_a_run() {
    let (reconciler, mut started, gate) = GatedReconciler::new();
    let executor = Executor::new(Arc::clone(&reconciler), CancellationToken::new());

    assert_eq!(executor.trigger("manual"), TriggerOutcome::Started);
    assert_eq!(started.recv().await.unwrap(), "manual");
    assert!(executor.is_running());

    gate.send(()).unwrap();
    assert!(executor.drain(Duration::from_secs(5)).await);
    assert_eq!(reconciler.run_count(), 1);
}

#[tokio::test]
async fn burst_of_triggers_coalesces_to_one_followup_with_latest_source() {
    let (reconciler, mut started, gate) = GatedReconciler::new();
    let executor = Executor::new(Arc::clone(&reconciler), CancellationToken::new());

    assert_eq!(executor.trigger("webhook"), TriggerOutcome::Started);
    started.recv().await.unwrap();

    // Ten triggers land while the first run is blocked.
    for i in 0..10 {
        assert_eq!(executor.trigger(format!("tcp:{i}")), TriggerOutcome::Coalesced);
    }

    // Release the first run; exactly one follow-up starts, with the
    // latest source.
    gate.send(()).unwrap();
    assert_eq!(started.recv().await.unwrap(), "tcp:9");
    gate.send(()).unwrap();

    assert!(executor.drain(Duration::from_secs(5)).await);
    assert_eq!(reconciler.run_count(), 2);
    assert_eq!(reconciler.sources(), vec!["webhook".to_string(), "tcp:9".to_string()]);
}

#[tokio::test]
async fn at_most_one_body_runs_concurrently() {
    let (reconciler, mut started, gate) = GatedReconciler::new();
    let executor = Executor::new(Arc::clone(&reconciler), CancellationToken::new());

    executor.trigger("a");
    started.recv().await.unwrap();
    executor.trigger("b");
    executor.trigger("c");

    // Only the first run has started; the burst did not spawn more.
    assert_eq!(reconciler.run_count(), 1);

    gate.send(()).unwrap();
    started.recv().await.unwrap();
    assert_eq!(reconciler.run_count(), 2);
    gate.send(()).unwrap();
    assert!(executor.drain(Duration::from_secs(5)).await);
    // b was overwritten by c; only two runs total.
    assert_eq!(reconciler.run_count(), 2);
    assert_eq!(reconciler.sources(), vec!["a".to_string(), "c".to_string()]);
}

#[tokio::test]
async fn shutdown_cancels_run_and_drops_pending() {
    let (reconciler, mut started, _gate) = GatedReconciler::new();
    let shutdown = CancellationToken::new();
    let executor = Executor::new(Arc::clone(&reconciler), shutdown.clone());

    executor.trigger("startup");
    started.recv().await.unwrap();
    executor.trigger("poll");

    // Cancelling the root aborts the blocked run and discards the
    // pending follow-up.
    shutdown.cancel();
    assert!(executor.drain(Duration::from_secs(5)).await);
    assert_eq!(reconciler.run_count(), 1);
    assert!(!executor.is_running());

    // New triggers after shutdown do not restart work.
    executor.trigger("late");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reconciler.run_count(), 1);
}

#[tokio::test]
async fn run_timeout_bounds_a_stuck_reconcile() {
    let (reconciler, mut started, _gate) = GatedReconciler::new();
    let executor = Executor::new_with_timeout(
        Arc::clone(&reconciler),
        CancellationToken::new(),
        Duration::from_millis(100),
    );

    executor.trigger("webhook");
    started.recv().await.unwrap();
    // The gate is never released; the timeout must reap the run.
    assert!(executor.drain(Duration::from_secs(5)).await);
    assert_eq!(reconciler.run_count(), 1);
}
