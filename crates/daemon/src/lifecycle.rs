// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, serving, graceful shutdown.
//!
//! Shutdown ordering matters: listeners close first so no new triggers
//! arrive, then the in-flight reconcile gets up to 30 seconds to drain.
//! Only if it overstays is the run context cancelled; a compose
//! rollback is never aborted because it runs on its own fresh context.

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use keel_alerts::providers::{
    CallMeBotProvider, DiscordProvider, NtfyProvider, SlackProvider, WebhookProvider,
};
use keel_alerts::{AlertManager, AlertProvider};
use keel_core::HealthState;
use keel_engine::{Executor, ReconcileError, Reconciler};

use crate::env::DaemonConfig;
use crate::server::uds::UdsConnectInfo;
use crate::server::{http_router, socket_router, tcp_router, AppState};
use crate::poll;

/// Grace period for an in-flight reconcile at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to bind unix socket at {path}: {source}")]
    BindSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind tcp listener at {addr}: {source}")]
    BindTcp {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind http listener on port {port}: {source}")]
    BindHttp {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] ReconcileError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the alert fan-out from provider env vars. Unset providers are
/// dropped by the manager.
pub fn alert_manager_from_env() -> AlertManager {
    let get = |name: &str| std::env::var(name).unwrap_or_default();
    let providers: Vec<Box<dyn AlertProvider>> = vec![
        Box::new(SlackProvider::new(get("KEEL_SLACK_WEBHOOK"))),
        Box::new(DiscordProvider::new(get("KEEL_DISCORD_WEBHOOK"))),
        Box::new(NtfyProvider::new(
            std::env::var("KEEL_NTFY_SERVER").unwrap_or_else(|_| "https://ntfy.sh".to_string()),
            get("KEEL_NTFY_TOPIC"),
        )),
        Box::new(WebhookProvider::new(
            get("KEEL_ALERT_WEBHOOK_URL"),
            std::env::var("KEEL_ALERT_WEBHOOK_SECRET").ok(),
        )),
        Box::new(CallMeBotProvider::new(get("KEEL_CALLMEBOT_PHONE"), get("KEEL_CALLMEBOT_APIKEY"))),
    ];
    AlertManager::new(providers)
}

/// Bind the Unix socket: private parent directory, stale socket
/// removed, file mode 0660.
fn bind_socket(path: &Path) -> Result<UnixListener, LifecycleError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::DirBuilder::new().recursive(true).mode(0o750).create(parent)?;
        }
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)
        .map_err(|source| LifecycleError::BindSocket { path: path.to_path_buf(), source })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;
    Ok(listener)
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(cfg: DaemonConfig) -> Result<(), LifecycleError> {
    let cfg = Arc::new(cfg);
    let health = Arc::new(HealthState::new());
    let alerts = Arc::new(alert_manager_from_env());
    if alerts.is_empty() {
        warn!("no alert providers configured");
    } else {
        info!(providers = ?alerts.provider_names(), "alert providers active");
    }

    // The run context: cancelling this aborts an in-flight reconcile.
    let run_cancel = CancellationToken::new();
    // The listener context: cancelling this stops accepting triggers.
    let listeners = CancellationToken::new();

    let reconciler = Arc::new(Reconciler::new(
        cfg.reconciler.clone(),
        Arc::clone(&alerts),
        Arc::clone(&health),
    )?);
    let executor = Executor::new(reconciler, run_cancel.clone());

    let state = AppState {
        executor: Arc::clone(&executor),
        health: Arc::clone(&health),
        cfg: Arc::clone(&cfg),
    };

    let mut servers = Vec::new();

    let socket = bind_socket(&cfg.socket_path)?;
    info!(path = %cfg.socket_path.display(), "unix socket listening");
    let socket_svc = socket_router(state.clone())
        .into_make_service_with_connect_info::<UdsConnectInfo>();
    let stop = listeners.clone();
    servers.push(tokio::spawn(async move {
        if let Err(err) =
            axum::serve(socket, socket_svc).with_graceful_shutdown(stop.cancelled_owned()).await
        {
            warn!(error = %err, "unix socket server exited with error");
        }
    }));

    if cfg.tcp_enabled {
        let tcp = TcpListener::bind(&cfg.tcp_addr)
            .await
            .map_err(|source| LifecycleError::BindTcp { addr: cfg.tcp_addr.clone(), source })?;
        info!(addr = %cfg.tcp_addr, "tcp api listening");
        let tcp_svc = tcp_router(state.clone())
            .into_make_service_with_connect_info::<std::net::SocketAddr>();
        let stop = listeners.clone();
        servers.push(tokio::spawn(async move {
            if let Err(err) =
                axum::serve(tcp, tcp_svc).with_graceful_shutdown(stop.cancelled_owned()).await
            {
                warn!(error = %err, "tcp server exited with error");
            }
        }));
    }

    if cfg.http_port > 0 {
        let addr = format!("0.0.0.0:{}", cfg.http_port);
        let http = TcpListener::bind(&addr)
            .await
            .map_err(|source| LifecycleError::BindHttp { port: cfg.http_port, source })?;
        info!(%addr, "webhook http listening");
        let http_svc = http_router(state.clone())
            .into_make_service_with_connect_info::<std::net::SocketAddr>();
        let stop = listeners.clone();
        servers.push(tokio::spawn(async move {
            if let Err(err) =
                axum::serve(http, http_svc).with_graceful_shutdown(stop.cancelled_owned()).await
            {
                warn!(error = %err, "webhook http server exited with error");
            }
        }));
    }

    // Startup + poll triggers.
    let poll_task = tokio::spawn(poll::run(
        Arc::clone(&executor),
        cfg.initial_delay,
        cfg.poll_interval,
        listeners.clone(),
    ));

    health.set_ready(true);
    info!("keeld ready");

    wait_for_signal().await;
    info!("shutdown signal received");

    // 1. Stop accepting triggers.
    listeners.cancel();
    for server in servers {
        let _ = server.await;
    }
    let _ = poll_task.await;

    // 2. Give the in-flight reconcile its grace period, then cancel.
    if !executor.drain(DRAIN_TIMEOUT).await {
        warn!("reconcile still running after grace period, cancelling");
        run_cancel.cancel();
        let _ = executor.drain(Duration::from_secs(5)).await;
    }

    // 3. Remove the socket file on clean exit.
    if cfg.socket_path.exists() {
        if let Err(err) = std::fs::remove_file(&cfg.socket_path) {
            warn!(error = %err, "failed to remove socket file");
        }
    }

    info!("keeld shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
