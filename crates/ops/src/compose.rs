// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container service restarts via the compose CLI, with rollback.
//!
//! `compose_up` brings the stack to the just-deployed file. If that
//! fails and a backup compose file is available, the same command runs
//! against the backup under a fresh context (a client disconnect must
//! never abort a rollback). The two terminal outcomes stay distinct:
//! [`ComposeError::RollbackSucceeded`] is a warning-grade condition,
//! [`ComposeError::RollbackFailed`] means manual intervention.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use keel_core::validate::{validate_container, validate_signal, ValidateError};

use crate::deploy::{shell_quote, DeployTools};
use crate::retry::{retry_transient, RetryError};
use crate::subprocess::{run_with_timeout, CmdError};

/// Default deadline for `compose up --wait`.
const COMPOSE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const SIGNAL_TIMEOUT: Duration = Duration::from_secs(30);
const PS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("compose up failed (no backup available): {source}")]
    FailedNoBackup {
        #[source]
        source: CmdError,
    },

    #[error("compose up failed (backup file not found): {source}")]
    FailedBackupMissing {
        #[source]
        source: CmdError,
    },

    #[error("deploy failed, rolled back to previous configuration: {deploy}")]
    RollbackSucceeded {
        #[source]
        deploy: CmdError,
    },

    #[error("deploy failed and rollback failed: {deploy}; rollback: {rollback}")]
    RollbackFailed { deploy: CmdError, rollback: Box<ComposeError> },

    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Cmd(#[from] CmdError),

    #[error(transparent)]
    Retry(#[from] RetryError),
}

/// Where the compose CLI runs.
#[derive(Debug, Clone)]
pub enum ComposeTarget {
    Local,
    Remote { host: String },
}

/// Compose CLI runner for one target.
#[derive(Debug, Clone)]
pub struct ComposeRunner {
    docker_bin: String,
    target: ComposeTarget,
    tools: DeployTools,
}

impl ComposeRunner {
    pub fn new(docker_bin: impl Into<String>, target: ComposeTarget, tools: DeployTools) -> Self {
        Self { docker_bin: docker_bin.into(), target, tools }
    }

    pub fn target(&self) -> &ComposeTarget {
        &self.target
    }

    async fn run_compose(
        &self,
        compose_file: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CmdError> {
        match &self.target {
            ComposeTarget::Local => {
                let mut cmd = Command::new(&self.docker_bin);
                cmd.args(["compose", "-f", compose_file, "up", "-d", "--remove-orphans", "--wait"]);
                run_with_timeout(&mut cmd, "docker compose", COMPOSE_TIMEOUT, cancel)
                    .await?
                    .into_ok("docker compose")?;
            }
            ComposeTarget::Remote { host } => {
                let remote = format!(
                    "{} compose -f {} up -d --remove-orphans --wait",
                    self.docker_bin,
                    shell_quote(compose_file)
                );
                self.tools
                    .ssh_exec(host, &remote, COMPOSE_TIMEOUT, cancel)
                    .await?
                    .into_ok("docker compose")?;
            }
        }
        Ok(())
    }

    /// Bring the stack up from `compose_file`.
    pub async fn compose_up(
        &self,
        compose_file: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ComposeError> {
        self.run_compose(compose_file, cancel).await?;
        Ok(())
    }

    /// Whether the backup compose file exists on the target.
    async fn backup_file_exists(&self, path: &str, cancel: &CancellationToken) -> bool {
        match &self.target {
            ComposeTarget::Local => Path::new(path).is_file(),
            ComposeTarget::Remote { host } => {
                let test = format!("test -f {}", shell_quote(path));
                matches!(
                    self.tools.ssh_exec(host, &test, SIGNAL_TIMEOUT, cancel).await,
                    Ok(out) if out.success
                )
            }
        }
    }

    /// Bring the stack up; on failure, roll back to the backup compose
    /// file if one is available.
    pub async fn compose_up_with_rollback(
        &self,
        compose_file: &str,
        backup_compose_file: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ComposeError> {
        let deploy_err = match self.run_compose(compose_file, cancel).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let Some(backup_file) = backup_compose_file else {
            return Err(ComposeError::FailedNoBackup { source: deploy_err });
        };

        // The rollback runs under a fresh context: the triggering client
        // may be gone, the previous stack still has to come back.
        let rollback_cancel = CancellationToken::new();

        if !self.backup_file_exists(backup_file, &rollback_cancel).await {
            return Err(ComposeError::FailedBackupMissing { source: deploy_err });
        }

        warn!(file = compose_file, backup = backup_file, "compose up failed, rolling back");
        match self.run_compose(backup_file, &rollback_cancel).await {
            Ok(()) => {
                info!(backup = backup_file, "rollback succeeded");
                Err(ComposeError::RollbackSucceeded { deploy: deploy_err })
            }
            Err(rollback_err) => {
                error!(error = %rollback_err, "rollback failed, manual intervention required");
                Err(ComposeError::RollbackFailed {
                    deploy: deploy_err,
                    rollback: Box::new(ComposeError::Cmd(rollback_err)),
                })
            }
        }
    }

    async fn run_signal(
        &self,
        container: &str,
        signal: &'static str,
        cancel: &CancellationToken,
    ) -> Result<(), CmdError> {
        match &self.target {
            ComposeTarget::Local => {
                let mut cmd = Command::new(&self.docker_bin);
                cmd.args(["kill", "--signal", signal, container]);
                run_with_timeout(&mut cmd, "docker kill", SIGNAL_TIMEOUT, cancel)
                    .await?
                    .into_ok("docker kill")?;
            }
            ComposeTarget::Remote { host } => {
                let remote =
                    format!("{} kill --signal={} {}", self.docker_bin, signal, container);
                self.tools
                    .ssh_exec(host, &remote, SIGNAL_TIMEOUT, cancel)
                    .await?
                    .into_ok("docker kill")?;
            }
        }
        Ok(())
    }

    /// Deliver `signal` to `container`, with the same transient-retry
    /// policy as the other remote operations.
    pub async fn signal_container(
        &self,
        container: &str,
        signal: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ComposeError> {
        validate_container(container)?;
        let canonical = validate_signal(signal)?;
        retry_transient("signal container", cancel, || {
            self.run_signal(container, canonical, cancel)
        })
        .await?;
        Ok(())
    }

    /// `compose ps --format json` output for the stack, for run logs.
    pub async fn compose_ps(
        &self,
        compose_file: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ComposeError> {
        let out = match &self.target {
            ComposeTarget::Local => {
                let mut cmd = Command::new(&self.docker_bin);
                cmd.args(["compose", "-f", compose_file, "ps", "--format", "json"]);
                run_with_timeout(&mut cmd, "docker compose ps", PS_TIMEOUT, cancel)
                    .await?
                    .into_ok("docker compose ps")?
            }
            ComposeTarget::Remote { host } => {
                let remote = format!(
                    "{} compose -f {} ps --format json",
                    self.docker_bin,
                    shell_quote(compose_file)
                );
                self.tools
                    .ssh_exec(host, &remote, PS_TIMEOUT, cancel)
                    .await?
                    .into_ok("docker compose ps")?
            }
        };
        Ok(out.stdout)
    }
}

#[cfg(test)]
#[path = "compose_tests.rs"]
mod tests;
