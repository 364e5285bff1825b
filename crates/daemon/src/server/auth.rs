// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer authentication and audit logging for the TCP listener.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::info;

use keel_engine::Reconcile;

use super::AppState;

/// Constant-time token equality.
pub(crate) fn token_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Reject requests without a matching `Authorization: Bearer <token>`.
/// `/health` stays public.
pub async fn require_bearer<R: Reconcile + 'static>(
    State(state): State<AppState<R>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let authorized = state.cfg.tcp_token.as_deref().is_some_and(|expected| {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|provided| token_matches(expected, provided))
    });
    if authorized {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer realm=\"keel\"")],
        "unauthorized\n",
    )
        .into_response()
}

/// Log every TCP request with method, path, peer address, status, and
/// latency.
pub async fn audit_log(
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        path,
        remote = %remote,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "tcp request"
    );
    response
}
