// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook HTTP endpoints.
//!
//! Signature rules: the raw body is HMAC-SHA-256'd with the shared
//! secret and compared constant-time against `X-Signature` or
//! `X-Hub-Signature-256` (an `sha256=` prefix is stripped). GitHub
//! events additionally filter on event type and branch before anything
//! is triggered.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use keel_engine::Reconcile;

use super::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Verify the body signature against the shared secret.
///
/// `Mac::verify_slice` is the constant-time comparison.
pub(crate) fn verify_signature(secret: &str, body: &[u8], headers: &HeaderMap) -> bool {
    let provided = headers
        .get("x-signature")
        .or_else(|| headers.get("x-hub-signature-256"))
        .and_then(|v| v.to_str().ok());
    let Some(provided) = provided else { return false };
    let hex_part = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(raw) = hex::decode(hex_part) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(body);
    mac.verify_slice(&raw).is_ok()
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "invalid signature\n").into_response()
}

fn accepted(extra: serde_json::Value) -> Response {
    let mut body = json!({"status": "accepted", "message": "reconcile triggered"});
    if let (Some(obj), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

/// Generic webhook: signature check, then trigger.
pub async fn generic<R: Reconcile + 'static>(
    State(state): State<AppState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.cfg.webhook_secret {
        if !verify_signature(secret, &body, &headers) {
            warn!("webhook rejected: bad or missing signature");
            return unauthorized();
        }
    }
    state.executor.trigger("webhook");
    accepted(json!({}))
}

/// Manual trigger endpoint, same signature rules as the generic hook.
pub async fn manual<R: Reconcile + 'static>(
    State(state): State<AppState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.cfg.webhook_secret {
        if !verify_signature(secret, &body, &headers) {
            warn!("manual webhook rejected: bad or missing signature");
            return unauthorized();
        }
    }
    state.executor.trigger("manual");
    accepted(json!({}))
}

#[derive(Deserialize)]
struct PushEvent {
    #[serde(default)]
    r#ref: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    pusher: Pusher,
}

#[derive(Deserialize, Default)]
struct Pusher {
    #[serde(default)]
    name: String,
}

/// GitHub webhook: ping/pong, non-push ignored, branch filter, then
/// trigger with the pusher threaded into the source tag.
pub async fn github<R: Reconcile + 'static>(
    State(state): State<AppState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.cfg.webhook_secret {
        if !verify_signature(secret, &body, &headers) {
            warn!("github webhook rejected: bad or missing signature");
            return unauthorized();
        }
    }

    let event = headers.get("x-github-event").and_then(|v| v.to_str().ok()).unwrap_or("");
    match event {
        "ping" => return (StatusCode::OK, "pong").into_response(),
        "push" => {}
        other => {
            debug!(event = other, "ignoring non-push github event");
            return (StatusCode::OK, "ignored").into_response();
        }
    }

    let Ok(push) = serde_json::from_slice::<PushEvent>(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed push payload\n").into_response();
    };

    let expected_ref = format!("refs/heads/{}", state.cfg.reconciler.repo_branch);
    if push.r#ref != expected_ref {
        debug!(push_ref = %push.r#ref, expected = %expected_ref, "push to other branch ignored");
        return (StatusCode::OK, "ignored").into_response();
    }

    let source = if push.pusher.name.is_empty() {
        "github".to_string()
    } else {
        format!("github:{}", push.pusher.name)
    };
    state.executor.trigger(source);
    accepted(json!({"commit": push.after}))
}
