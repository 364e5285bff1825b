// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The trigger plane: three HTTP surfaces over one executor.
//!
//! Unix socket (primary, with peer credentials and the privileged
//! `/config`), TCP (bearer-authenticated, audited), and public webhook
//! HTTP. Every trigger endpoint responds "accepted" immediately; the
//! reconcile itself runs in the executor's own bounded context, never
//! the request's.

pub mod auth;
pub mod uds;
pub mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use keel_engine::{Executor, Reconcile};
use keel_core::HealthState;

use crate::env::DaemonConfig;
use self::uds::UdsConnectInfo;

/// Shared context for every handler.
pub struct AppState<R: Reconcile + 'static> {
    pub executor: Arc<Executor<R>>,
    pub health: Arc<HealthState>,
    pub cfg: Arc<DaemonConfig>,
}

impl<R: Reconcile + 'static> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            health: Arc::clone(&self.health),
            cfg: Arc::clone(&self.cfg),
        }
    }
}

/// Unix-socket API: trigger/status/health plus the socket-only
/// `/config` for sibling processes.
pub fn socket_router<R: Reconcile + 'static>(state: AppState<R>) -> Router {
    Router::new()
        .route("/trigger", post(socket_trigger::<R>))
        .route("/status", get(status::<R>))
        .route("/health", get(health::<R>))
        .route("/config", get(config::<R>))
        .with_state(state)
}

/// TCP API: same surface minus `/config`, behind bearer auth, audited.
pub fn tcp_router<R: Reconcile + 'static>(state: AppState<R>) -> Router {
    Router::new()
        .route("/trigger", post(tcp_trigger::<R>))
        .route("/status", get(status::<R>))
        .route("/health", get(health::<R>))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer::<R>))
        .layer(middleware::from_fn(auth::audit_log))
        .with_state(state)
}

/// Public webhook API. The webhook/health/ready paths come from the
/// config so reverse proxies can be matched without code changes.
pub fn http_router<R: Reconcile + 'static>(state: AppState<R>) -> Router {
    let webhook_path = state.cfg.webhook_path.clone();
    let health_path = state.cfg.health_path.clone();
    let ready_path = state.cfg.ready_path.clone();
    Router::new()
        .route(&webhook_path, post(webhook::generic::<R>))
        .route(&format!("{webhook_path}/github"), post(webhook::github::<R>))
        .route(&format!("{webhook_path}/manual"), post(webhook::manual::<R>))
        .route(&health_path, get(health::<R>))
        .route(&ready_path, get(ready::<R>))
        .route("/metrics", get(metrics::<R>))
        .with_state(state)
}

#[derive(Deserialize, Default)]
struct TriggerBody {
    source: Option<String>,
}

/// Parse the optional `{"source": ...}` body; an empty body is fine,
/// malformed JSON is a 400.
fn parse_trigger_body(body: &Bytes) -> Result<TriggerBody, Response> {
    if body.is_empty() {
        return Ok(TriggerBody::default());
    }
    serde_json::from_slice(body)
        .map_err(|_| (StatusCode::BAD_REQUEST, "malformed request body\n").into_response())
}

fn trigger_response<R: Reconcile + 'static>(state: &AppState<R>, source: String) -> Response {
    info!(source, "trigger accepted");
    let outcome = state.executor.trigger(source);
    let message = match outcome {
        keel_engine::TriggerOutcome::Started => "reconcile started",
        keel_engine::TriggerOutcome::Coalesced => "reconcile already running, queued",
    };
    (StatusCode::ACCEPTED, Json(json!({"status": "accepted", "message": message})))
        .into_response()
}

async fn socket_trigger<R: Reconcile + 'static>(
    State(state): State<AppState<R>>,
    ConnectInfo(peer): ConnectInfo<UdsConnectInfo>,
    body: Bytes,
) -> Response {
    let parsed = match parse_trigger_body(&body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let source = parsed.source.unwrap_or_else(|| peer.source_label());
    trigger_response(&state, source)
}

async fn tcp_trigger<R: Reconcile + 'static>(
    State(state): State<AppState<R>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let parsed = match parse_trigger_body(&body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let source = parsed.source.unwrap_or_else(|| format!("tcp:{remote}"));
    trigger_response(&state, source)
}

async fn status<R: Reconcile + 'static>(State(state): State<AppState<R>>) -> Json<serde_json::Value> {
    let last = state.health.last();
    Json(json!({
        "state": if state.executor.is_running() { "reconciling" } else { "idle" },
        "last_reconcile": last.finished_at.map(|t| t.to_rfc3339()),
        "last_error": last.error,
        "uptime_seconds": state.health.uptime().as_secs(),
    }))
}

async fn health<R: Reconcile + 'static>(State(state): State<AppState<R>>) -> Response {
    let last = state.health.last();
    let ready = state.health.is_ready();
    let status = if !ready {
        "starting"
    } else if last.error.is_some() {
        "degraded"
    } else {
        "ok"
    };
    let body = Json(json!({
        "status": status,
        "ready": ready,
        "last_reconcile": last.finished_at.map(|t| t.to_rfc3339()),
        "last_error": last.error,
        "uptime_seconds": state.health.uptime().as_secs(),
    }));
    if ready {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

async fn ready<R: Reconcile + 'static>(State(state): State<AppState<R>>) -> Response {
    if state.health.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready\n").into_response()
    }
}

/// Socket-only runtime configuration for sibling processes. Never
/// routed on TCP or webhook HTTP.
async fn config<R: Reconcile + 'static>(State(state): State<AppState<R>>) -> Json<serde_json::Value> {
    Json(json!({
        "webhook_secret": state.cfg.webhook_secret,
        "poll_interval": state.cfg.poll_interval.as_secs(),
        "repo_url": state.cfg.reconciler.repo_url,
        "repo_branch": state.cfg.reconciler.repo_branch,
    }))
}

/// Minimal scrape surface.
async fn metrics<R: Reconcile + 'static>(State(state): State<AppState<R>>) -> Response {
    let ready = i32::from(state.health.is_ready());
    let uptime = state.health.uptime().as_secs();
    let last = state.health.last_reconcile_epoch().unwrap_or(0);
    let errors = state.health.errors_total();
    let body = format!(
        "# TYPE keel_ready gauge\nkeel_ready {ready}\n\
         # TYPE keel_uptime_seconds counter\nkeel_uptime_seconds {uptime}\n\
         # TYPE keel_last_reconcile_timestamp gauge\nkeel_last_reconcile_timestamp {last}\n\
         # TYPE keel_reconcile_errors_total counter\nkeel_reconcile_errors_total {errors}\n"
    );
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
