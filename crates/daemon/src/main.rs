// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! keeld: GitOps container reconciliation daemon.

use tracing::error;
use tracing_subscriber::EnvFilter;

use keel_daemon::env::DaemonConfig;
use keel_daemon::lifecycle;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = match DaemonConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "configuration error");
            std::process::exit(2);
        }
    };

    if let Err(err) = lifecycle::run(cfg).await {
        error!(error = %err, "daemon failed");
        std::process::exit(1);
    }
}
