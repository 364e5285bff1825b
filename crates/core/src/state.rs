// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide reconcile observables shared with the trigger plane.
//!
//! Health and status handlers read these without ever blocking an
//! in-flight run, so the fields live behind reader/writer locks that are
//! only held for the copy.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A request to reconcile. The source is a free-form origin tag
/// (`"webhook"`, `"github:<pusher>"`, `"socket (pid:1234)"`, `"tcp:<addr>"`,
/// `"poll"`, `"startup"`, `"manual"`) used only for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub source: String,
}

impl ReconcileRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

/// Outcome of the most recent finished reconcile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastReconcile {
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Shared reconcile health, written by the engine and read by the
/// `/status`, `/health`, and `/metrics` handlers.
pub struct HealthState {
    started: Instant,
    last: RwLock<LastReconcile>,
    ready: RwLock<bool>,
    errors_total: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last: RwLock::new(LastReconcile::default()),
            ready: RwLock::new(false),
            errors_total: AtomicU64::new(0),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn set_ready(&self, ready: bool) {
        *self.ready.write() = ready;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.read()
    }

    /// Record a successful run: stamps `finished_at`, clears the error.
    pub fn record_success(&self) {
        let mut last = self.last.write();
        last.finished_at = Some(Utc::now());
        last.error = None;
    }

    /// Record a failed run: stamps `finished_at`, stores the classified
    /// error message, bumps the error counter.
    pub fn record_failure(&self, error: impl Into<String>) {
        {
            let mut last = self.last.write();
            last.finished_at = Some(Utc::now());
            last.error = Some(error.into());
        }
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last(&self) -> LastReconcile {
        self.last.read().clone()
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Unix-epoch seconds of the last finished run, for the scrape surface.
    pub fn last_reconcile_epoch(&self) -> Option<i64> {
        self.last.read().finished_at.map(|t| t.timestamp())
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
