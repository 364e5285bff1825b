// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The end-to-end reconcile pipeline.
//!
//! One run: lock, sync, decrypt, render, back up, deploy, restart,
//! record, alert. Stages execute strictly in that order and never
//! overlap; the executor guarantees at most one run at a time within
//! the process and the file lock guards against a second daemon.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use keel_alerts::{
    deploy_failure_alert, deploy_rollback_alert, deploy_success_alert, rollback_failed_alert,
    AlertManager,
};
use keel_core::validate::validate_host;
use keel_core::{truncate, HealthState, ReconcileRequest};
use keel_ops::{
    backup, fsops, ComposeRunner, ComposeTarget, Decryptor, DeployTools, FsOpsError, GitRepo,
    HostKeyPolicy, Renderer,
};

use crate::error::ReconcileError;
use crate::executor::{Outcome, Reconcile};
use crate::lock::RunLock;

/// Everything one reconcile run needs to know, fixed at startup.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub lock_path: PathBuf,
    pub repo_url: String,
    pub repo_branch: String,
    pub repo_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Subdirectory of the repo holding the deployable tree; empty
    /// means the repo root.
    pub infra_subdir: String,
    pub backups_to_keep: usize,
    /// Empty means "deploy locally" (when the local appdata exists).
    pub target_host: Option<String>,
    pub local_appdata: PathBuf,
    pub remote_appdata: String,
    /// Encrypted secret files, relative to the repo root.
    pub secret_files: Vec<PathBuf>,
    /// Compose file name within the deployed tree.
    pub compose_file: String,
    /// Ancillary container signalled (best-effort) after a deploy.
    pub agent_container: Option<String>,
    pub sops_bin: String,
    pub age_key_path: PathBuf,
    pub render_bin: String,
    pub template_suffix: String,
    pub docker_bin: String,
    pub ssh_bin: String,
    pub scp_bin: String,
    pub tar_bin: String,
    pub host_key: HostKeyPolicy,
    pub dry_run: bool,
    pub force: bool,
}

/// Where this run deploys to.
#[derive(Debug, Clone)]
enum Mode {
    Local,
    Remote { host: String },
}

impl Mode {
    fn target_label(&self) -> String {
        match self {
            Mode::Local => "local".to_string(),
            Mode::Remote { host } => host.clone(),
        }
    }
}

#[derive(Default)]
struct RunInfo {
    commit: String,
    subject: String,
    target: String,
}

pub struct Reconciler {
    cfg: ReconcilerConfig,
    repo: GitRepo,
    decryptor: Decryptor,
    renderer: Renderer,
    tools: DeployTools,
    alerts: Arc<AlertManager>,
    health: Arc<HealthState>,
}

impl Reconciler {
    pub fn new(
        cfg: ReconcilerConfig,
        alerts: Arc<AlertManager>,
        health: Arc<HealthState>,
    ) -> Result<Self, ReconcileError> {
        let repo = GitRepo::new(&cfg.repo_url, &cfg.repo_branch, &cfg.repo_dir)?
            .with_host_key_policy(cfg.host_key);
        let decryptor = Decryptor::new(&cfg.sops_bin, &cfg.age_key_path);
        let renderer = Renderer::new(&cfg.render_bin, &cfg.template_suffix);
        let tools = DeployTools {
            ssh_bin: cfg.ssh_bin.clone(),
            scp_bin: cfg.scp_bin.clone(),
            tar_bin: cfg.tar_bin.clone(),
            host_key: cfg.host_key,
            dry_run: cfg.dry_run,
        };
        Ok(Self { cfg, repo, decryptor, renderer, tools, alerts, health })
    }

    async fn run_pipeline(
        &self,
        cancel: &CancellationToken,
        run: &mut RunInfo,
    ) -> Result<Outcome, ReconcileError> {
        // 1. Sync the mirror to the remote branch.
        let sync = self.repo.sync(cancel).await?;
        run.commit = sync.after.clone();
        if !sync.changed && !self.cfg.force {
            info!(commit = %sync.after, "repo unchanged, nothing to do");
            return Ok(Outcome::Unchanged { commit: sync.after });
        }
        run.subject = self.repo.head_subject(cancel).await?;

        // 2. Decrypt secrets. A missing file is fatal, not skippable.
        let secret_paths: Vec<PathBuf> =
            self.cfg.secret_files.iter().map(|p| self.cfg.repo_dir.join(p)).collect();
        let secrets = self.decryptor.decrypt_files(&secret_paths, cancel).await?;

        // 3. Render into a cleared staging directory.
        self.reset_staging()?;
        let src = if self.cfg.infra_subdir.is_empty() {
            self.cfg.repo_dir.clone()
        } else {
            self.cfg.repo_dir.join(&self.cfg.infra_subdir)
        };
        let stats =
            self.renderer.render_tree(&src, &self.cfg.staging_dir, &secrets, cancel).await?;
        info!(rendered = stats.rendered, copied = stats.copied, "staging tree ready");

        // 4. Pick the deploy target.
        let mode = self.select_mode(&secrets)?;
        run.target = mode.target_label();
        if let Mode::Remote { host } = &mode {
            keel_ops::ssh::probe(&self.tools.ssh_bin, host, self.cfg.host_key, cancel).await?;
        }

        // 5. Back up the live configuration. Best-effort: a failed
        // backup costs us rollback, not the deploy.
        let backup_handle = if self.cfg.dry_run {
            None
        } else {
            self.take_backup(&mode, cancel).await
        };

        // 6. Push the rendered tree and restart services.
        self.push_tree(&mode, cancel).await?;
        if self.cfg.dry_run {
            info!("dry-run: skipping service restart and staging cleanup");
            return Ok(Outcome::Deployed { commit: sync.after, target: run.target.clone() });
        }
        self.restart_services(&mode, backup_handle.as_ref(), cancel).await?;

        // 7. Best-effort ancillary reload.
        if let Some(container) = &self.cfg.agent_container {
            let runner = self.compose_runner(&mode);
            if let Err(err) = runner.signal_container(container, "SIGHUP", cancel).await {
                warn!(container, error = %err, "ancillary container reload failed");
            }
        }

        // 8. Clear staging only after everything landed.
        if let Err(err) = std::fs::remove_dir_all(&self.cfg.staging_dir) {
            warn!(error = %err, "failed to clean staging directory");
        }

        Ok(Outcome::Deployed { commit: sync.after, target: run.target.clone() })
    }

    fn reset_staging(&self) -> Result<(), ReconcileError> {
        let staging = &self.cfg.staging_dir;
        if staging.exists() {
            std::fs::remove_dir_all(staging).map_err(|e| {
                ReconcileError::Staging(FsOpsError::Io {
                    action: "remove dir",
                    path: staging.clone(),
                    source: e,
                })
            })?;
        }
        fsops::create_dir_0755(staging)?;
        Ok(())
    }

    /// Local iff no target host is configured and the local appdata
    /// path exists; otherwise remote, falling back to the address the
    /// secrets carry when no host is configured.
    fn select_mode(&self, secrets: &Value) -> Result<Mode, ReconcileError> {
        let configured = self.cfg.target_host.as_deref().filter(|h| !h.is_empty());
        if configured.is_none() && self.cfg.local_appdata.exists() {
            return Ok(Mode::Local);
        }
        if let Some(host) = configured {
            validate_host(host)?;
            return Ok(Mode::Remote { host: host.to_string() });
        }
        if let Some(ip) = secrets["network"]["unraid_ip"].as_str() {
            let host = format!("root@{ip}");
            validate_host(&host)?;
            return Ok(Mode::Remote { host });
        }
        Err(ReconcileError::NoTarget)
    }

    /// Create a backup of the live configuration and keep a plain copy
    /// of the live compose file beside the archive for rollback.
    /// Returns `None` when backup fails; the run continues without a
    /// rollback path.
    async fn take_backup(
        &self,
        mode: &Mode,
        cancel: &CancellationToken,
    ) -> Option<backup::BackupHandle> {
        let created = match mode {
            Mode::Local => {
                backup::create_local(
                    &self.tools,
                    &self.cfg.backup_dir,
                    &[self.cfg.local_appdata.clone()],
                    cancel,
                )
                .await
            }
            Mode::Remote { host } => {
                backup::create_remote(
                    &self.tools,
                    &self.cfg.backup_dir,
                    host,
                    &[self.cfg.remote_appdata.clone()],
                    cancel,
                )
                .await
            }
        };
        let handle = match created {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "backup failed, continuing without rollback path");
                return None;
            }
        };

        self.preserve_live_compose(mode, &handle, cancel).await;

        if let Err(err) = backup::prune(&self.cfg.backup_dir, self.cfg.backups_to_keep) {
            warn!(error = %err, "backup prune failed");
        }
        Some(handle)
    }

    /// Snapshot the live compose file as a plain file in the backup
    /// directory so a rollback can point compose at it directly.
    async fn preserve_live_compose(
        &self,
        mode: &Mode,
        handle: &backup::BackupHandle,
        cancel: &CancellationToken,
    ) {
        let saved = handle.dir.join(&self.cfg.compose_file);
        match mode {
            Mode::Local => {
                let live = self.cfg.local_appdata.join(&self.cfg.compose_file);
                if live.is_file() {
                    if let Err(err) = fsops::copy_file(&live, &saved) {
                        warn!(error = %err, "failed to preserve live compose file");
                    }
                }
            }
            Mode::Remote { host } => {
                let live = format!("{}/{}", self.cfg.remote_appdata, self.cfg.compose_file);
                let read = format!("cat {}", shell_quote(&live));
                match self.tools.ssh_exec(host, &read, std::time::Duration::from_secs(30), cancel).await
                {
                    Ok(out) if out.success => {
                        if let Err(err) = std::fs::write(&saved, out.stdout) {
                            warn!(error = %err, "failed to preserve live compose file");
                        }
                    }
                    Ok(out) => {
                        warn!(stderr = %out.stderr, "no live compose file to preserve");
                    }
                    Err(err) => warn!(error = %err, "failed to read live compose file"),
                }
            }
        }
    }

    /// Push each managed service tree, then the top-level files, each
    /// via an atomic operation. Order is fixed (name order) so runs are
    /// reproducible.
    async fn push_tree(&self, mode: &Mode, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        let mut services = Vec::new();
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&self.cfg.staging_dir).map_err(|e| {
            ReconcileError::Staging(FsOpsError::Io {
                action: "read dir",
                path: self.cfg.staging_dir.clone(),
                source: e,
            })
        })?;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                services.push(name);
            } else {
                files.push(name);
            }
        }
        services.sort();
        files.sort();

        match mode {
            Mode::Local => {
                for service in &services {
                    self.tools
                        .deploy_local(
                            &self.cfg.staging_dir.join(service),
                            &self.cfg.local_appdata.join(service),
                        )
                        .await?;
                }
                if !self.cfg.dry_run {
                    for file in &files {
                        fsops::copy_file(
                            &self.cfg.staging_dir.join(file),
                            &self.cfg.local_appdata.join(file),
                        )?;
                    }
                }
            }
            Mode::Remote { host } => {
                for service in &services {
                    self.tools
                        .deploy_remote(
                            &self.cfg.staging_dir.join(service),
                            host,
                            &format!("{}/{}", self.cfg.remote_appdata, service),
                            cancel,
                        )
                        .await?;
                }
                for file in &files {
                    self.tools
                        .copy_file_remote(
                            &self.cfg.staging_dir.join(file),
                            host,
                            &format!("{}/{}", self.cfg.remote_appdata, file),
                            cancel,
                        )
                        .await?;
                }
            }
        }
        info!(services = services.len(), files = files.len(), "configuration pushed");
        Ok(())
    }

    fn compose_runner(&self, mode: &Mode) -> ComposeRunner {
        let target = match mode {
            Mode::Local => ComposeTarget::Local,
            Mode::Remote { host } => ComposeTarget::Remote { host: host.clone() },
        };
        ComposeRunner::new(&self.cfg.docker_bin, target, self.tools.clone())
    }

    /// Compose-up the deployed file; on failure, roll back to the
    /// compose file preserved with the backup.
    async fn restart_services(
        &self,
        mode: &Mode,
        backup_handle: Option<&backup::BackupHandle>,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let runner = self.compose_runner(mode);
        let compose_path = match mode {
            Mode::Local => {
                self.cfg.local_appdata.join(&self.cfg.compose_file).to_string_lossy().into_owned()
            }
            Mode::Remote { .. } => {
                format!("{}/{}", self.cfg.remote_appdata, self.cfg.compose_file)
            }
        };

        let backup_compose = match backup_handle {
            None => None,
            Some(handle) => {
                let saved = handle.dir.join(&self.cfg.compose_file);
                if !saved.is_file() {
                    None
                } else {
                    match mode {
                        Mode::Local => Some(saved.to_string_lossy().into_owned()),
                        Mode::Remote { host } => {
                            // The rollback file has to live on the host;
                            // push the preserved copy beside the live one.
                            let remote = format!(
                                "{}/.rollback-{}",
                                self.cfg.remote_appdata, self.cfg.compose_file
                            );
                            match self
                                .tools
                                .copy_file_remote(&saved, host, &remote, cancel)
                                .await
                            {
                                Ok(()) => Some(remote),
                                Err(err) => {
                                    warn!(error = %err, "failed to stage rollback compose file");
                                    None
                                }
                            }
                        }
                    }
                }
            }
        };

        runner.compose_up_with_rollback(&compose_path, backup_compose.as_deref(), cancel).await?;
        match runner.compose_ps(&compose_path, cancel).await {
            Ok(listing) => debug!(%listing, "stack state after restart"),
            Err(err) => debug!(error = %err, "compose ps failed after restart"),
        }
        Ok(())
    }

    /// Record the run and fan out the lifecycle alert.
    async fn finish(&self, source: &str, run: &RunInfo, result: &Result<Outcome, ReconcileError>) {
        let commit = if run.commit.is_empty() { "unknown" } else { run.commit.as_str() };
        let target = if run.target.is_empty() { "unknown" } else { run.target.as_str() };
        let alert = match result {
            Ok(Outcome::Unchanged { .. }) => {
                self.health.record_success();
                None
            }
            Ok(Outcome::Deployed { .. }) => {
                self.health.record_success();
                Some(deploy_success_alert(commit, &run.subject, target, source))
            }
            Err(err) => {
                let short = truncate(&err.to_string(), 300);
                self.health.record_failure(format!("{}: {}", err.kind(), short));
                Some(match err.kind() {
                    "deploy_failed_rollback_succeeded" => {
                        deploy_rollback_alert(commit, target, &short, source)
                    }
                    "deploy_failed_rollback_failed" => {
                        rollback_failed_alert(commit, target, &short, source)
                    }
                    _ => deploy_failure_alert(commit, target, &short, source),
                })
            }
        };
        if let Some(alert) = alert {
            if let Err(err) = self.alerts.send(&alert).await {
                warn!(error = %err, "alert fan-out reported failures");
            }
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        let guard = RunLock::try_acquire(&self.cfg.lock_path).map_err(ReconcileError::Lock)?;
        if guard.is_none() {
            return Err(ReconcileError::Busy);
        }

        info!(source = %request.source, "reconcile starting");
        let mut run = RunInfo::default();
        let result = self.run_pipeline(cancel, &mut run).await;
        self.finish(&request.source, &run, &result).await;
        // Lock releases here, on every path.
        drop(guard);
        result
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
