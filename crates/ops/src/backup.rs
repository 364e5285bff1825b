// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timestamped configuration backups.
//!
//! Each backup is a `backup-YYYYMMDD-HHMMSS/` directory holding one
//! `configs.tar.gz`. Names sort lexicographically in creation order, so
//! pruning keeps the newest by name. Only archives that verify (exist,
//! non-empty, listable, at least one entry) are kept; anything else is
//! deleted on the spot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::deploy::{shell_quote, DeployTools};
use crate::retry::{retry_transient, RetryError};
use crate::subprocess::{run_with_timeout, CmdError};

const BACKUP_PREFIX: &str = "backup-";
const ARCHIVE_NAME: &str = "configs.tar.gz";
const TAR_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup archive failed verification: {path}")]
    VerifyFailed { path: PathBuf },

    #[error("{action} failed for {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cmd(#[from] CmdError),

    #[error(transparent)]
    Retry(#[from] RetryError),
}

/// A created-and-verified backup.
#[derive(Debug, Clone)]
pub struct BackupHandle {
    pub dir: PathBuf,
    pub archive: PathBuf,
}

fn new_backup_dir(backup_root: &Path) -> Result<(PathBuf, PathBuf), BackupError> {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let dir = backup_root.join(format!("{BACKUP_PREFIX}{stamp}"));
    std::fs::create_dir_all(&dir)
        .map_err(|e| BackupError::Io { action: "create dir", path: dir.clone(), source: e })?;
    let archive = dir.join(ARCHIVE_NAME);
    Ok((dir, archive))
}

/// Archive local `paths` into a fresh backup directory.
///
/// Missing paths are tolerated: tar may exit non-zero and the backup is
/// still kept as long as the archive verifies.
pub async fn create_local(
    tools: &DeployTools,
    backup_root: &Path,
    paths: &[PathBuf],
    cancel: &CancellationToken,
) -> Result<BackupHandle, BackupError> {
    let (dir, archive) = new_backup_dir(backup_root)?;

    let mut cmd = Command::new(&tools.tar_bin);
    cmd.arg("-czf").arg(&archive);
    for path in paths {
        cmd.arg(path);
    }
    let out = run_with_timeout(&mut cmd, "tar", TAR_TIMEOUT, cancel).await;
    if let Ok(out) = &out {
        if !out.success {
            warn!(code = ?out.code, "tar exited non-zero; keeping backup if it verifies");
        }
    }
    out?;

    verify_or_delete(tools, &dir, &archive, cancel).await?;
    info!(archive = %archive.display(), "backup created");
    Ok(BackupHandle { dir, archive })
}

/// Archive remote `paths` on `host`, streaming `tar -czf -` to a local
/// archive file. The remote tar runs under transient retry.
pub async fn create_remote(
    tools: &DeployTools,
    backup_root: &Path,
    host: &str,
    paths: &[String],
    cancel: &CancellationToken,
) -> Result<BackupHandle, BackupError> {
    let (dir, archive) = new_backup_dir(backup_root)?;

    let quoted: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
    // Missing remote paths are tolerated the same way as local ones.
    let tar_cmd = format!("tar -czf - {} 2>/dev/null || true", quoted.join(" "));

    let result = retry_transient("remote backup", cancel, || {
        stream_remote_archive(tools, host, &tar_cmd, &archive, cancel)
    })
    .await;
    if let Err(err) = result {
        let _ = std::fs::remove_dir_all(&dir);
        return Err(err.into());
    }

    verify_or_delete(tools, &dir, &archive, cancel).await?;
    info!(host, archive = %archive.display(), "remote backup created");
    Ok(BackupHandle { dir, archive })
}

/// Run the remote tar with its stdout wired straight into the archive
/// file; gzip bytes never pass through an in-memory string.
async fn stream_remote_archive(
    tools: &DeployTools,
    host: &str,
    tar_cmd: &str,
    archive: &Path,
    cancel: &CancellationToken,
) -> Result<(), CmdError> {
    let file = std::fs::File::create(archive)
        .map_err(|source| CmdError::Io { program: "tar".into(), source })?;

    let mut cmd = Command::new(&tools.ssh_bin);
    cmd.args(tools.ssh_base())
        .arg(host)
        .arg(tar_cmd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::from(file))
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn().map_err(|source| CmdError::Spawn { program: "ssh".into(), source })?;

    let waited = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(CmdError::Cancelled { program: "ssh".into() }),
        waited = tokio::time::timeout(TAR_TIMEOUT, child.wait_with_output()) => waited,
    };
    let out = match waited {
        Err(_) => return Err(CmdError::Timeout { program: "ssh".into(), timeout: TAR_TIMEOUT }),
        Ok(result) => result.map_err(|source| CmdError::Io { program: "ssh".into(), source })?,
    };
    if !out.status.success() {
        return Err(CmdError::Failed {
            program: "ssh".into(),
            code: out.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Verify the archive; a failure deletes the whole backup directory.
async fn verify_or_delete(
    tools: &DeployTools,
    dir: &Path,
    archive: &Path,
    cancel: &CancellationToken,
) -> Result<(), BackupError> {
    if verify(tools, archive, cancel).await {
        return Ok(());
    }
    let _ = std::fs::remove_dir_all(dir);
    Err(BackupError::VerifyFailed { path: archive.to_path_buf() })
}

/// An archive verifies iff it exists, is non-empty, lists cleanly, and
/// contains at least one entry.
pub async fn verify(tools: &DeployTools, archive: &Path, cancel: &CancellationToken) -> bool {
    let Ok(meta) = std::fs::metadata(archive) else { return false };
    if meta.len() == 0 {
        return false;
    }
    let mut cmd = Command::new(&tools.tar_bin);
    cmd.arg("-tzf").arg(archive);
    match run_with_timeout(&mut cmd, "tar", TAR_TIMEOUT, cancel).await {
        Ok(out) if out.success => out.stdout.lines().any(|l| !l.trim().is_empty()),
        _ => false,
    }
}

/// Keep the `keep` lexicographically-largest `backup-*` directories,
/// deleting the rest. Returns how many were removed.
pub fn prune(backup_root: &Path, keep: usize) -> Result<usize, BackupError> {
    let entries = match std::fs::read_dir(backup_root) {
        Ok(entries) => entries,
        // No backup dir yet means nothing to prune.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(BackupError::Io {
                action: "read dir",
                path: backup_root.to_path_buf(),
                source: e,
            })
        }
    };

    let mut backups: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(BACKUP_PREFIX))
                    .unwrap_or(false)
        })
        .collect();
    backups.sort();

    let excess = backups.len().saturating_sub(keep);
    for old in &backups[..excess] {
        std::fs::remove_dir_all(old)
            .map_err(|e| BackupError::Io { action: "remove dir", path: old.clone(), source: e })?;
        info!(dir = %old.display(), "pruned old backup");
    }
    Ok(excess)
}

/// Most recent backup directory, if any.
pub fn latest(backup_root: &Path) -> Option<BackupHandle> {
    let entries = std::fs::read_dir(backup_root).ok()?;
    let mut backups: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(BACKUP_PREFIX))
                    .unwrap_or(false)
        })
        .collect();
    backups.sort();
    let dir = backups.pop()?;
    let archive = dir.join(ARCHIVE_NAME);
    archive.is_file().then_some(BackupHandle { dir, archive })
}

#[cfg(test)]
#[path = "backup_tests.rs"]
mod tests;
