// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon.
//!
//! Configuration is read once at process start, over defaults, and the
//! resulting [`DaemonConfig`] is immutable for the process lifetime.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use keel_engine::ReconcilerConfig;
use keel_ops::HostKeyPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KEEL_REPO_URL is required")]
    RepoUrlMissing,

    #[error("KEEL_TCP_TOKEN is required when KEEL_TCP_ENABLED is set")]
    TcpTokenMissing,

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },
}

/// Full daemon configuration, environment over defaults.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub tcp_enabled: bool,
    pub tcp_addr: String,
    pub tcp_token: Option<String>,
    /// 0 disables the webhook HTTP server.
    pub http_port: u16,
    pub webhook_path: String,
    pub health_path: String,
    pub ready_path: String,
    pub webhook_secret: Option<String>,
    /// Zero disables polling.
    pub poll_interval: Duration,
    /// Delay before the startup reconcile.
    pub initial_delay: Duration,
    pub reconciler: ReconcilerConfig,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn var_path(name: &str, default: &str) -> PathBuf {
    PathBuf::from(var_or(name, default))
}

fn var_bool(name: &str) -> bool {
    matches!(var(name).as_deref(), Some("1" | "true" | "yes" | "on"))
}

fn var_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match var(name) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid { var: name.to_string(), value: raw }),
    }
}

fn var_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { var: name.to_string(), value: raw }),
    }
}

fn var_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { var: name.to_string(), value: raw }),
    }
}

impl DaemonConfig {
    /// Build the configuration from `KEEL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let repo_url = var("KEEL_REPO_URL").ok_or(ConfigError::RepoUrlMissing)?;

        let tcp_enabled = var_bool("KEEL_TCP_ENABLED");
        let tcp_token = var("KEEL_TCP_TOKEN");
        if tcp_enabled && tcp_token.is_none() {
            return Err(ConfigError::TcpTokenMissing);
        }

        let host_key = match var("KEEL_SSH_HOST_KEY_POLICY") {
            None => HostKeyPolicy::default(),
            Some(raw) => {
                let parsed = HostKeyPolicy::parse(&raw);
                parsed.ok_or(ConfigError::Invalid {
                    var: "KEEL_SSH_HOST_KEY_POLICY".to_string(),
                    value: raw,
                })?
            }
        };

        let state_dir = var_path("KEEL_STATE_DIR", "/var/lib/keel");
        let secret_files: Vec<PathBuf> = var("KEEL_SECRET_FILES")
            .map(|raw| raw.split(',').map(|s| PathBuf::from(s.trim())).collect())
            .unwrap_or_default();

        let reconciler = ReconcilerConfig {
            lock_path: var_path("KEEL_LOCK_PATH", "/var/run/keel.lock"),
            repo_url,
            repo_branch: var_or("KEEL_REPO_BRANCH", "main"),
            repo_dir: var("KEEL_REPO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir.join("repo")),
            staging_dir: var("KEEL_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir.join("staging")),
            backup_dir: var("KEEL_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir.join("backups")),
            infra_subdir: var_or("KEEL_INFRA_SUBDIR", "infra"),
            backups_to_keep: var_usize("KEEL_BACKUPS_KEEP", 5)?,
            target_host: var("KEEL_TARGET_HOST"),
            local_appdata: var_path("KEEL_LOCAL_APPDATA", "/opt/appdata"),
            remote_appdata: var_or("KEEL_REMOTE_APPDATA", "/mnt/user/appdata"),
            secret_files,
            compose_file: var_or("KEEL_COMPOSE_FILE", "compose.yml"),
            agent_container: var("KEEL_AGENT_CONTAINER"),
            sops_bin: var_or("KEEL_SOPS_BIN", "sops"),
            age_key_path: var("KEEL_AGE_KEY_PATH").map(PathBuf::from).unwrap_or_else(|| {
                let home = var_or("HOME", "/root");
                PathBuf::from(home).join(".config/sops/age/keys.txt")
            }),
            render_bin: var_or("KEEL_RENDER_BIN", "tmplr"),
            template_suffix: var_or("KEEL_TEMPLATE_SUFFIX", ".tmpl"),
            docker_bin: var_or("KEEL_DOCKER_BIN", "docker"),
            ssh_bin: var_or("KEEL_SSH_BIN", "ssh"),
            scp_bin: var_or("KEEL_SCP_BIN", "scp"),
            tar_bin: var_or("KEEL_TAR_BIN", "tar"),
            host_key,
            dry_run: var_bool("KEEL_DRY_RUN"),
            force: var_bool("KEEL_FORCE"),
        };

        Ok(Self {
            socket_path: var_path("KEEL_SOCKET_PATH", "/var/run/keel.sock"),
            tcp_enabled,
            tcp_addr: var_or("KEEL_TCP_ADDR", "0.0.0.0:9444"),
            tcp_token,
            http_port: var_u16("KEEL_HTTP_PORT", 8080)?,
            webhook_path: var_or("KEEL_WEBHOOK_PATH", "/webhook"),
            health_path: var_or("KEEL_HEALTH_PATH", "/health"),
            ready_path: var_or("KEEL_READY_PATH", "/ready"),
            webhook_secret: var("KEEL_WEBHOOK_SECRET"),
            poll_interval: var_secs("KEEL_POLL_INTERVAL", 0)?,
            initial_delay: var_secs("KEEL_INITIAL_DELAY", 0)?,
            reconciler,
        })
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
