// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::Request;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use keel_core::ReconcileRequest;
use keel_engine::{Outcome, ReconcileError, ReconcilerConfig};
use keel_ops::HostKeyPolicy;

struct FakeReconciler {
    runs: AtomicUsize,
    sources: parking_lot::Mutex<Vec<String>>,
}

impl FakeReconciler {
    fn new() -> Arc<Self> {
        Arc::new(Self { runs: AtomicUsize::new(0), sources: parking_lot::Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl Reconcile for FakeReconciler {
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        _cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().push(request.source.clone());
        Ok(Outcome::Unchanged { commit: "abc123def456".into() })
    }
}

fn test_config(webhook_secret: Option<&str>, tcp_token: Option<&str>) -> DaemonConfig {
    DaemonConfig {
        socket_path: "/tmp/keel-test.sock".into(),
        tcp_enabled: tcp_token.is_some(),
        tcp_addr: "127.0.0.1:9444".into(),
        tcp_token: tcp_token.map(String::from),
        http_port: 8080,
        webhook_path: "/webhook".into(),
        health_path: "/health".into(),
        ready_path: "/ready".into(),
        webhook_secret: webhook_secret.map(String::from),
        poll_interval: std::time::Duration::from_secs(300),
        initial_delay: std::time::Duration::ZERO,
        reconciler: ReconcilerConfig {
            lock_path: "/tmp/keel-test.lock".into(),
            repo_url: "git@github.com:home/infra.git".into(),
            repo_branch: "main".into(),
            repo_dir: "/tmp/repo".into(),
            staging_dir: "/tmp/staging".into(),
            backup_dir: "/tmp/backups".into(),
            infra_subdir: "infra".into(),
            backups_to_keep: 5,
            target_host: None,
            local_appdata: "/tmp/appdata".into(),
            remote_appdata: "/mnt/user/appdata".into(),
            secret_files: vec![],
            compose_file: "compose.yml".into(),
            agent_container: None,
            sops_bin: "sops".into(),
            age_key_path: "/tmp/keys.txt".into(),
            render_bin: "tmplr".into(),
            template_suffix: ".tmpl".into(),
            docker_bin: "docker".into(),
            ssh_bin: "ssh".into(),
            scp_bin: "scp".into(),
            tar_bin: "tar".into(),
            host_key: HostKeyPolicy::KnownHosts,
            dry_run: false,
            force: false,
        },
    }
}

struct Fixture {
    state: AppState<FakeReconciler>,
    reconciler: Arc<FakeReconciler>,
}

fn fixture(webhook_secret: Option<&str>, tcp_token: Option<&str>) -> Fixture {
    let reconciler = FakeReconciler::new();
    let executor = Executor::new(Arc::clone(&reconciler), CancellationToken::new());
    let state = AppState {
        executor,
        health: Arc::new(HealthState::new()),
        cfg: Arc::new(test_config(webhook_secret, tcp_token)),
    };
    Fixture { state, reconciler }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Let the executor's spawned run land before asserting counters.
async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

const PUSH_BODY: &str = r#"{"ref":"refs/heads/main","after":"abc123def456","pusher":{"name":"octocat"}}"#;

// --- webhook HTTP ---

#[tokio::test]
async fn github_push_on_configured_branch_is_accepted() {
    let f = fixture(Some("shhh"), None);
    let app = http_router(f.state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", sign("shhh", PUSH_BODY.as_bytes()))
                .body(Body::from(PUSH_BODY))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_string(response).await;
    assert!(body.contains("\"commit\":\"abc123def456\""), "body: {body}");

    settle().await;
    assert_eq!(f.reconciler.runs.load(Ordering::SeqCst), 1);
    assert_eq!(f.reconciler.sources.lock().clone(), vec!["github:octocat".to_string()]);
}

#[tokio::test]
async fn github_push_to_other_branch_is_ignored() {
    let f = fixture(Some("shhh"), None);
    let app = http_router(f.state.clone());
    let body = r#"{"ref":"refs/heads/dev","after":"abc","pusher":{"name":"octocat"}}"#;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", sign("shhh", body.as_bytes()))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ignored");
    settle().await;
    assert_eq!(f.reconciler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn github_ping_pongs() {
    let f = fixture(Some("shhh"), None);
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "ping")
                .header("X-Hub-Signature-256", sign("shhh", b"{}"))
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "pong");
}

#[tokio::test]
async fn github_non_push_event_is_ignored() {
    let f = fixture(None, None);
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "issues")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ignored");
}

#[tokio::test]
async fn bad_signature_is_401_with_no_reconcile() {
    let f = fixture(Some("shhh"), None);
    let app = http_router(f.state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", sign("wrong", PUSH_BODY.as_bytes()))
                .body(Body::from(PUSH_BODY))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Missing signature is equally rejected.
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    settle().await;
    assert_eq!(f.reconciler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn generic_webhook_without_secret_accepts_unsigned() {
    let f = fixture(None, None);
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(Request::builder().method("POST").uri("/webhook").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    settle().await;
    assert_eq!(f.reconciler.sources.lock().clone(), vec!["webhook".to_string()]);
}

#[tokio::test]
async fn malformed_push_payload_is_400() {
    let f = fixture(None, None);
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-GitHub-Event", "push")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_method_is_405() {
    let f = fixture(None, None);
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(Request::builder().method("GET").uri("/webhook").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn metrics_expose_the_minimal_scrape() {
    let f = fixture(None, None);
    f.state.health.set_ready(true);
    f.state.health.record_failure("git: fetch failed");
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("keel_ready 1"));
    assert!(body.contains("keel_uptime_seconds"));
    assert!(body.contains("keel_last_reconcile_timestamp"));
    assert!(body.contains("keel_reconcile_errors_total 1"));
}

#[tokio::test]
async fn ready_flips_health_and_ready_endpoints() {
    let f = fixture(None, None);
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    f.state.health.set_ready(true);
    let app = http_router(f.state.clone());
    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// --- TCP API ---

fn tcp_app(f: &Fixture) -> Router {
    tcp_router(f.state.clone())
        .layer(MockConnectInfo(SocketAddr::from(([192, 168, 1, 7], 52100))))
}

#[tokio::test]
async fn tcp_without_bearer_is_401_with_challenge() {
    let f = fixture(None, Some("t0ken"));
    let response = tcp_app(&f)
        .oneshot(Request::builder().method("POST").uri("/trigger").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers().get("www-authenticate").unwrap().to_str().unwrap();
    assert!(challenge.starts_with("Bearer realm="));
    settle().await;
    assert_eq!(f.reconciler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tcp_with_bearer_triggers_with_remote_source() {
    let f = fixture(None, Some("t0ken"));
    let response = tcp_app(&f)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/trigger")
                .header("Authorization", "Bearer t0ken")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    settle().await;
    assert_eq!(f.reconciler.sources.lock().clone(), vec!["tcp:192.168.1.7:52100".to_string()]);
}

#[tokio::test]
async fn tcp_health_is_public() {
    let f = fixture(None, Some("t0ken"));
    f.state.health.set_ready(true);
    let response = tcp_app(&f)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tcp_never_serves_config() {
    let f = fixture(Some("shhh"), Some("t0ken"));
    let response = tcp_app(&f)
        .oneshot(
            Request::builder()
                .uri("/config")
                .header("Authorization", "Bearer t0ken")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let f = fixture(None, Some("t0ken"));
    let response = tcp_app(&f)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/trigger")
                .header("Authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// --- Unix socket API ---

fn socket_app(f: &Fixture) -> Router {
    socket_router(f.state.clone())
        .layer(MockConnectInfo(uds::UdsConnectInfo { uid: 1000, gid: 1000, pid: Some(4242) }))
}

#[tokio::test]
async fn socket_trigger_threads_peer_credentials_into_source() {
    let f = fixture(None, None);
    let response = socket_app(&f)
        .oneshot(Request::builder().method("POST").uri("/trigger").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    settle().await;
    assert_eq!(f.reconciler.sources.lock().clone(), vec!["socket (uid=1000,gid=1000,pid=4242)".to_string()]);
}

#[tokio::test]
async fn socket_trigger_body_source_wins() {
    let f = fixture(None, None);
    let response = socket_app(&f)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/trigger")
                .body(Body::from(r#"{"source":"manual"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    settle().await;
    assert_eq!(f.reconciler.sources.lock().clone(), vec!["manual".to_string()]);
}

#[tokio::test]
async fn socket_trigger_malformed_body_is_400() {
    let f = fixture(None, None);
    let response = socket_app(&f)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/trigger")
                .body(Body::from("{oops"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    settle().await;
    assert_eq!(f.reconciler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn socket_config_exposes_select_runtime_settings() {
    let f = fixture(Some("shhh"), None);
    let response = socket_app(&f)
        .oneshot(Request::builder().uri("/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["webhook_secret"], "shhh");
    assert_eq!(parsed["poll_interval"], 300);
    assert_eq!(parsed["repo_branch"], "main");
}

#[tokio::test]
async fn status_reflects_last_run() {
    let f = fixture(None, None);
    f.state.health.record_failure("git_failed: fetch timed out");
    let response = socket_app(&f)
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(parsed["state"], "idle");
    assert_eq!(parsed["last_error"], "git_failed: fetch timed out");
    assert!(parsed["last_reconcile"].is_string());
}

#[tokio::test]
async fn health_is_503_until_ready() {
    let f = fixture(None, None);
    let response = socket_app(&f)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    f.state.health.set_ready(true);
    let response = socket_app(&f)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["ready"], true);
}
