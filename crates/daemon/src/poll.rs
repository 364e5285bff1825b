// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer-based triggers: the startup reconcile and the poll ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use keel_engine::{Executor, Reconcile};

/// Fire the startup trigger after `initial_delay`, then poll every
/// `poll_interval` (zero disables polling) until shutdown.
pub async fn run<R: Reconcile + 'static>(
    executor: Arc<Executor<R>>,
    initial_delay: Duration,
    poll_interval: Duration,
    stop: CancellationToken,
) {
    if !initial_delay.is_zero() {
        tokio::select! {
            () = stop.cancelled() => return,
            () = tokio::time::sleep(initial_delay) => {}
        }
    }
    if stop.is_cancelled() {
        return;
    }
    executor.trigger("startup");

    if poll_interval.is_zero() {
        info!("polling disabled");
        return;
    }
    info!(interval = ?poll_interval, "poll ticker started");
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the startup trigger already
    // covered it.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            _ = ticker.tick() => {
                executor.trigger("poll");
            }
        }
    }
}

#[cfg(test)]
#[path = "poll_tests.rs"]
mod tests;
