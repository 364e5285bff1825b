// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconcile failure classification.

use thiserror::Error;

use keel_ops::{
    BackupError, ComposeError, DeployError, FsOpsError, GitError, RenderError, SecretsError,
    SshError,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reconcile lock already held")]
    Busy,

    #[error(transparent)]
    Validate(#[from] keel_core::ValidateError),

    #[error("git: {0}")]
    Git(#[from] GitError),

    #[error("secrets: {0}")]
    Secrets(#[from] SecretsError),

    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error("backup: {0}")]
    Backup(#[from] BackupError),

    #[error("deploy: {0}")]
    Deploy(#[from] DeployError),

    #[error("deploy: {0}")]
    Ssh(#[from] SshError),

    #[error("deploy: {0}")]
    Compose(#[from] ComposeError),

    #[error("staging: {0}")]
    Staging(#[from] FsOpsError),

    #[error("no deploy target: target host is empty, local appdata is absent, \
             and secrets carry no fallback address")]
    NoTarget,

    #[error("lock file: {0}")]
    Lock(#[source] std::io::Error),
}

impl ReconcileError {
    /// Stable classification string surfaced in status and alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Busy => "busy",
            ReconcileError::Validate(_) => "validation_rejected",
            ReconcileError::Git(_) => "git_failed",
            ReconcileError::Secrets(SecretsError::FileMissing { .. }) => "secrets_missing",
            ReconcileError::Secrets(_) => "secrets_decrypt_failed",
            ReconcileError::Render(_) => "render_failed",
            ReconcileError::Backup(_) => "backup_failed",
            ReconcileError::Compose(ComposeError::RollbackSucceeded { .. }) => {
                "deploy_failed_rollback_succeeded"
            }
            ReconcileError::Compose(ComposeError::RollbackFailed { .. }) => {
                "deploy_failed_rollback_failed"
            }
            ReconcileError::Deploy(_)
            | ReconcileError::Ssh(_)
            | ReconcileError::Compose(_)
            | ReconcileError::NoTarget => "deploy_failed",
            ReconcileError::Staging(_) => "render_failed",
            ReconcileError::Lock(_) => "busy",
        }
    }
}
