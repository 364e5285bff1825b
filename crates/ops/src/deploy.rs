// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pushing the staged tree to the target, atomically.
//!
//! Local targets get a sibling-temp-then-rename swap. Remote targets get
//! tar piped over ssh into a remote temp directory, then a single
//! `rm -rf dst && mv tmp dst` so the live directory is replaced in one
//! command. Either way a failure leaves the previous contents in place.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel_core::validate::{validate_host, ValidateError};

use crate::fsops::{self, FsOpsError};
use crate::retry::{retry_transient, RetryError};
use crate::ssh::HostKeyPolicy;
use crate::subprocess::{run_with_timeout, CmdError, CmdOutput};

/// Default deadline for a single remote command.
const REMOTE_CMD_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for a streamed transfer (tar pipe, scp).
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deploy source is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Fs(#[from] FsOpsError),

    #[error(transparent)]
    Cmd(#[from] CmdError),

    #[error(transparent)]
    Retry(#[from] RetryError),
}

/// Quote a string for a remote shell using the `'\''` idiom.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// External tool handles plus deployment-wide flags.
#[derive(Debug, Clone)]
pub struct DeployTools {
    pub ssh_bin: String,
    pub scp_bin: String,
    pub tar_bin: String,
    pub host_key: HostKeyPolicy,
    pub dry_run: bool,
}

impl Default for DeployTools {
    fn default() -> Self {
        Self {
            ssh_bin: "ssh".into(),
            scp_bin: "scp".into(),
            tar_bin: "tar".into(),
            host_key: HostKeyPolicy::default(),
            dry_run: false,
        }
    }
}

impl DeployTools {
    pub(crate) fn ssh_base(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("StrictHostKeyChecking={}", self.host_key.ssh_option()),
        ]
    }

    /// Run one command string on the host. Status is reported in the
    /// output; callers decide whether non-zero is fatal.
    pub async fn ssh_exec(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CmdOutput, CmdError> {
        let mut cmd = Command::new(&self.ssh_bin);
        cmd.args(self.ssh_base()).arg(host).arg(command);
        run_with_timeout(&mut cmd, "ssh", timeout, cancel).await
    }

    /// `ssh_exec` that requires exit status 0.
    async fn ssh_run(
        &self,
        host: &str,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CmdError> {
        self.ssh_exec(host, command, REMOTE_CMD_TIMEOUT, cancel).await?.into_ok("ssh")?;
        Ok(())
    }

    /// Replace `dst_dir` with the contents of `src_dir` on this machine.
    ///
    /// The copy lands in a sibling temp directory first; only after it
    /// is complete is the old directory removed and the temp renamed in.
    pub async fn deploy_local(&self, src_dir: &Path, dst_dir: &Path) -> Result<(), DeployError> {
        if !src_dir.is_dir() {
            return Err(DeployError::NotADirectory { path: src_dir.to_path_buf() });
        }
        if self.dry_run {
            info!(src = %src_dir.display(), dst = %dst_dir.display(), "dry-run: skipping local deploy");
            return Ok(());
        }
        if let Some(parent) = dst_dir.parent() {
            fsops::create_dir_0755(parent)?;
        }

        let tmp = fsops::sibling_temp(dst_dir);
        let staged = fsops::copy_tree(src_dir, &tmp).and_then(|()| {
            if dst_dir.exists() {
                std::fs::remove_dir_all(dst_dir).map_err(|e| FsOpsError::Io {
                    action: "remove dir",
                    path: dst_dir.to_path_buf(),
                    source: e,
                })?;
            }
            std::fs::rename(&tmp, dst_dir).map_err(|e| FsOpsError::Io {
                action: "rename",
                path: dst_dir.to_path_buf(),
                source: e,
            })
        });
        if staged.is_err() {
            let _ = std::fs::remove_dir_all(&tmp);
        }
        staged?;
        debug!(dst = %dst_dir.display(), "local deploy complete");
        Ok(())
    }

    /// Replace `dst_dir` on `host` with the contents of `src_dir`.
    pub async fn deploy_remote(
        &self,
        src_dir: &Path,
        host: &str,
        dst_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        validate_host(host)?;
        if !src_dir.is_dir() {
            return Err(DeployError::NotADirectory { path: src_dir.to_path_buf() });
        }
        if self.dry_run {
            info!(src = %src_dir.display(), host, dst = dst_dir, "dry-run: skipping remote deploy");
            return Ok(());
        }

        // (1) ensure the parent directory exists on the host
        let parent = Path::new(dst_dir)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        let mkdir_parent = format!("mkdir -p {}", shell_quote(&parent));
        retry_transient("ensure remote parent", cancel, || {
            self.ssh_run(host, &mkdir_parent, cancel)
        })
        .await?;

        // (2) uniquely-named temp directory beside the destination
        let tmp = format!("{}.tmp.{}", dst_dir, nanoid::nanoid!(8));
        let mkdir_tmp = format!("mkdir -p {}", shell_quote(&tmp));
        retry_transient("create remote temp", cancel, || self.ssh_run(host, &mkdir_tmp, cancel))
            .await?;

        // (3) stream the tree into the temp dir
        let streamed =
            retry_transient("stream tree", cancel, || self.stream_tar(src_dir, host, &tmp, cancel))
                .await;
        if let Err(err) = streamed {
            // Best-effort removal of the partial temp dir before reporting.
            let cleanup = format!("rm -rf {}", shell_quote(&tmp));
            let _ = self.ssh_run(host, &cleanup, cancel).await;
            return Err(err.into());
        }

        // (4) atomic replace in a single remote command
        let swap = format!(
            "rm -rf {} && mv {} {}",
            shell_quote(dst_dir),
            shell_quote(&tmp),
            shell_quote(dst_dir)
        );
        retry_transient("swap remote dir", cancel, || self.ssh_run(host, &swap, cancel)).await?;

        info!(host, dst = dst_dir, "remote deploy complete");
        Ok(())
    }

    /// `tar -C src -cf - .` piped into `ssh host 'tar -C tmp -xf -'`.
    async fn stream_tar(
        &self,
        src_dir: &Path,
        host: &str,
        remote_tmp: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CmdError> {
        let mut tar = Command::new(&self.tar_bin)
            .arg("-C")
            .arg(src_dir)
            .args(["-cf", "-", "."])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CmdError::Spawn { program: "tar".into(), source })?;

        let mut ssh = Command::new(&self.ssh_bin)
            .args(self.ssh_base())
            .arg(host)
            .arg(format!("tar -C {} -xf -", shell_quote(remote_tmp)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CmdError::Spawn { program: "ssh".into(), source })?;

        let pump = async {
            // Move the archive bytes across, then drop ssh's stdin so the
            // remote tar sees EOF.
            if let (Some(mut out), Some(mut inp)) = (tar.stdout.take(), ssh.stdin.take()) {
                tokio::io::copy(&mut out, &mut inp)
                    .await
                    .map_err(|source| CmdError::Io { program: "tar|ssh".into(), source })?;
            }
            let tar_out = tar
                .wait_with_output()
                .await
                .map_err(|source| CmdError::Io { program: "tar".into(), source })?;
            let ssh_out = ssh
                .wait_with_output()
                .await
                .map_err(|source| CmdError::Io { program: "ssh".into(), source })?;
            if !tar_out.status.success() {
                return Err(CmdError::Failed {
                    program: "tar".into(),
                    code: tar_out.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&tar_out.stderr).into_owned(),
                });
            }
            if !ssh_out.status.success() {
                return Err(CmdError::Failed {
                    program: "ssh".into(),
                    code: ssh_out.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&ssh_out.stderr).into_owned(),
                });
            }
            Ok(())
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CmdError::Cancelled { program: "tar|ssh".into() }),
            done = tokio::time::timeout(TRANSFER_TIMEOUT, pump) => match done {
                Err(_) => Err(CmdError::Timeout { program: "tar|ssh".into(), timeout: TRANSFER_TIMEOUT }),
                Ok(result) => result,
            },
        }
    }

    async fn scp_to(
        &self,
        src_file: &Path,
        host: &str,
        dst: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CmdError> {
        let mut cmd = Command::new(&self.scp_bin);
        cmd.args(self.ssh_base()).arg(src_file).arg(format!("{host}:{dst}"));
        run_with_timeout(&mut cmd, "scp", TRANSFER_TIMEOUT, cancel).await?.into_ok("scp")?;
        Ok(())
    }

    /// Copy a single file to the host: scp to a `.tmp.<nonce>` sibling,
    /// then `mv` into place.
    pub async fn copy_file_remote(
        &self,
        src_file: &Path,
        host: &str,
        dst_file: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        validate_host(host)?;
        if self.dry_run {
            info!(src = %src_file.display(), host, dst = dst_file, "dry-run: skipping file copy");
            return Ok(());
        }
        let tmp = format!("{}.tmp.{}", dst_file, nanoid::nanoid!(8));

        let copied =
            retry_transient("scp file", cancel, || self.scp_to(src_file, host, &tmp, cancel)).await;
        if let Err(err) = copied {
            let cleanup = format!("rm -f {}", shell_quote(&tmp));
            let _ = self.ssh_run(host, &cleanup, cancel).await;
            return Err(err.into());
        }

        let mv = format!("mv {} {}", shell_quote(&tmp), shell_quote(dst_file));
        retry_transient("move file into place", cancel, || self.ssh_run(host, &mv, cancel)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
pub(crate) mod tests;
