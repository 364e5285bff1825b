// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git operations over the `git` CLI.
//!
//! The daemon only ever fast-forwards its mirror to the remote branch:
//! fetch with depth 1 and hard-reset, never merge, never commit. A dirty
//! worktree is a sign something else wrote into the mirror and aborts
//! the sync.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel_core::validate::{validate_branch, ValidateError};

use crate::ssh::HostKeyPolicy;
use crate::subprocess::{run_with_timeout, CmdError};

/// Per-operation deadlines, overridable per call site.
#[derive(Debug, Clone, Copy)]
pub struct GitTimeouts {
    pub clone: Duration,
    pub fetch: Duration,
    pub local: Duration,
    pub check: Duration,
}

impl Default for GitTimeouts {
    fn default() -> Self {
        Self {
            clone: Duration::from_secs(5 * 60),
            fetch: Duration::from_secs(2 * 60),
            local: Duration::from_secs(30),
            check: Duration::from_secs(2),
        }
    }
}

/// Result of a sync: whether HEAD moved and between which commits.
/// `before` is empty when the sync was a fresh clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub changed: bool,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error("worktree has local modifications, refusing to reset: {dir}")]
    DirtyWorktree { dir: PathBuf },

    #[error("remote branch {branch:?} not found after fetch")]
    RemoteBranchMissing { branch: String },

    #[error(transparent)]
    Cmd(#[from] CmdError),
}

/// A single repository mirror: url, branch, local directory.
#[derive(Debug, Clone)]
pub struct GitRepo {
    url: String,
    branch: String,
    dir: PathBuf,
    host_key: HostKeyPolicy,
    timeouts: GitTimeouts,
}

impl GitRepo {
    /// The branch is exec-bound (it is spliced into refspecs), so it is
    /// validated here, once, before any operation can run.
    pub fn new(
        url: impl Into<String>,
        branch: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, GitError> {
        let branch = branch.into();
        validate_branch(&branch)?;
        Ok(Self {
            url: url.into(),
            branch,
            dir: dir.into(),
            host_key: HostKeyPolicy::default(),
            timeouts: GitTimeouts::default(),
        })
    }

    #[must_use]
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: GitTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn is_ssh_url(&self) -> bool {
        self.url.starts_with("ssh://")
            || (!self.url.starts_with("http") && self.url.contains('@') && self.url.contains(':'))
    }

    /// Base command with prompting disabled. For SSH-style URLs the
    /// host-key policy is threaded through `GIT_SSH_COMMAND`; key auth
    /// itself comes from the ambient agent socket.
    fn command(&self, cwd: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if self.is_ssh_url() {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!("ssh -o BatchMode=yes -o StrictHostKeyChecking={}", self.host_key.ssh_option()),
            );
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    async fn run_in_repo(
        &self,
        args: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, GitError> {
        let mut cmd = self.command(Some(&self.dir));
        cmd.args(args);
        let out = run_with_timeout(&mut cmd, "git", timeout, cancel).await?.into_ok("git")?;
        Ok(out.stdout.trim().to_string())
    }

    /// Cheap check: does the directory hold a git repository?
    pub async fn is_repo(&self, cancel: &CancellationToken) -> bool {
        if !self.dir.is_dir() {
            return false;
        }
        let mut cmd = self.command(Some(&self.dir));
        cmd.args(["rev-parse", "--git-dir"]);
        matches!(
            run_with_timeout(&mut cmd, "git", self.timeouts.check, cancel).await,
            Ok(out) if out.success
        )
    }

    /// Clone the configured branch, shallow when `depth > 0`.
    ///
    /// A failed clone removes whatever partial directory git left behind.
    pub async fn clone_repo(&self, depth: u32, cancel: &CancellationToken) -> Result<(), GitError> {
        if let Some(parent) = self.dir.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let depth_arg = depth.to_string();
        let dir_str = self.dir.to_string_lossy().into_owned();
        let mut args: Vec<&str> = vec!["clone", "--single-branch", "--branch", &self.branch];
        if depth > 0 {
            args.extend(["--depth", depth_arg.as_str()]);
        }
        args.push(&self.url);
        args.push(&dir_str);

        let mut cmd = self.command(None);
        cmd.args(&args);
        let result = run_with_timeout(&mut cmd, "git", self.timeouts.clone, cancel)
            .await
            .and_then(|out| out.into_ok("git"));
        match result {
            Ok(_) => {
                info!(url = %self.url, branch = %self.branch, "cloned repository");
                Ok(())
            }
            Err(err) => {
                let _ = std::fs::remove_dir_all(&self.dir);
                Err(err.into())
            }
        }
    }

    /// Fetch the configured branch with depth 1 and hard-reset to it.
    ///
    /// Refuses to touch a dirty worktree.
    pub async fn pull(&self, cancel: &CancellationToken) -> Result<SyncOutcome, GitError> {
        if self.is_dirty(cancel).await? {
            return Err(GitError::DirtyWorktree { dir: self.dir.clone() });
        }

        let before = self.head_commit(cancel).await?;
        let refspec =
            format!("+refs/heads/{0}:refs/remotes/origin/{0}", self.branch);
        self.run_in_repo(
            &["fetch", "--depth", "1", "origin", &refspec],
            self.timeouts.fetch,
            cancel,
        )
        .await?;

        if !self.remote_branch_exists(&self.branch, cancel).await? {
            return Err(GitError::RemoteBranchMissing { branch: self.branch.clone() });
        }

        let remote_ref = format!("refs/remotes/origin/{}", self.branch);
        self.run_in_repo(&["reset", "--hard", &remote_ref], self.timeouts.local, cancel).await?;

        let after = self.head_commit(cancel).await?;
        let changed = before != after;
        debug!(%before, %after, changed, "pull complete");
        Ok(SyncOutcome { changed, before, after })
    }

    /// Clone if the mirror is absent, otherwise pull.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncOutcome, GitError> {
        if self.is_repo(cancel).await {
            self.pull(cancel).await
        } else {
            self.clone_repo(1, cancel).await?;
            let after = self.head_commit(cancel).await?;
            Ok(SyncOutcome { changed: true, before: String::new(), after })
        }
    }

    pub async fn head_commit(&self, cancel: &CancellationToken) -> Result<String, GitError> {
        self.run_in_repo(&["rev-parse", "HEAD"], self.timeouts.local, cancel).await
    }

    pub async fn head_subject(&self, cancel: &CancellationToken) -> Result<String, GitError> {
        self.run_in_repo(&["log", "-1", "--format=%s"], self.timeouts.local, cancel).await
    }

    pub async fn is_dirty(&self, cancel: &CancellationToken) -> Result<bool, GitError> {
        let status =
            self.run_in_repo(&["status", "--porcelain"], self.timeouts.local, cancel).await?;
        Ok(!status.is_empty())
    }

    pub async fn remote_branch_exists(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, GitError> {
        validate_branch(name)?;
        let remote_ref = format!("refs/remotes/origin/{name}");
        let mut cmd = self.command(Some(&self.dir));
        cmd.args(["rev-parse", "--verify", "--quiet", &remote_ref]);
        let out = run_with_timeout(&mut cmd, "git", self.timeouts.local, cancel).await?;
        Ok(out.success)
    }
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
