// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template rendering into the staging tree.
//!
//! The renderer is an external tool invoked once per template file. It
//! never sees secret values in argv or environment: the whole secret
//! tree is written to a 0600 temp file and only that *path* is exported,
//! in [`SECRETS_PATH_ENV`]. The child environment is rebuilt from an
//! allowlist so ambient credentials cannot leak into template code.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel_core::truncate_bytes;

use crate::fsops::{self, FsOpsError};
use crate::subprocess::{run_with_timeout, CmdError};

/// Env var naming the secret-tree file for the renderer.
pub const SECRETS_PATH_ENV: &str = "KEEL_SECRETS_FILE";

/// Exact env names passed through to the renderer.
const ENV_ALLOW_EXACT: &[&str] =
    &["PATH", "HOME", "USER", "LANG", "TERM", "TMPDIR", "TMP", "TEMP"];

/// Env name prefixes passed through to the renderer.
const ENV_ALLOW_PREFIX: &[&str] = &["LC_", "XDG_"];

/// Denied prefixes. Checked even for allowlisted names so `XDG_`-style
/// wildcards cannot smuggle a credential-shaped variable through.
const ENV_DENY_PREFIX: &[&str] = &[
    "SOPS_", "AWS_", "AZURE_", "GCP_", "GOOGLE_", "DO_", "LINODE_", "VULTR_", "CLOUDFLARE_",
    "HETZNER_", "OVH_", "API_KEY", "SECRET", "TOKEN", "PASSWORD", "CREDENTIAL",
];

/// Denied suffixes.
const ENV_DENY_SUFFIX: &[&str] = &[
    "_TOKEN", "_SECRET", "_KEY", "_PASS", "_PASSWORD", "_AUTH", "_CREDENTIAL", "_CREDENTIALS",
];

/// Denied exact names.
const ENV_DENY_EXACT: &[&str] = &[
    "GITHUB_TOKEN",
    "GITLAB_TOKEN",
    "NPM_TOKEN",
    "DOCKER_AUTH",
    "REGISTRY_AUTH",
    "SSH_AUTH_SOCK",
    "GPG_TTY",
];

/// Whether a parent env var may be inherited by the renderer.
fn env_allowed(name: &str) -> bool {
    let allowed = ENV_ALLOW_EXACT.contains(&name)
        || ENV_ALLOW_PREFIX.iter().any(|p| name.starts_with(p));
    if !allowed {
        return false;
    }
    if ENV_DENY_EXACT.contains(&name) {
        return false;
    }
    if ENV_DENY_PREFIX.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    if ENV_DENY_SUFFIX.iter().any(|s| name.ends_with(s)) {
        return false;
    }
    true
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template source is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("render failed for {path}: {stderr}")]
    RenderFailed { path: PathBuf, stderr: String },

    #[error("failed to stage secrets file: {source}")]
    SecretsFile {
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fs(#[from] FsOpsError),

    #[error(transparent)]
    Cmd(#[from] CmdError),
}

/// Counts reported back for the run log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered: usize,
    pub copied: usize,
}

/// External template renderer handle.
#[derive(Debug, Clone)]
pub struct Renderer {
    tool: String,
    suffix: String,
    timeout: Duration,
}

impl Renderer {
    pub fn new(tool: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self { tool: tool.into(), suffix: suffix.into(), timeout: Duration::from_secs(60) }
    }

    /// Render `src` into `dst`: templates through the tool, everything
    /// else copied verbatim at the same relative path. The `.git`
    /// directory is never part of the rendered tree.
    pub async fn render_tree(
        &self,
        src: &Path,
        dst: &Path,
        secrets: &Value,
        cancel: &CancellationToken,
    ) -> Result<RenderStats, RenderError> {
        if !src.is_dir() {
            return Err(RenderError::NotADirectory { path: src.to_path_buf() });
        }
        fsops::create_dir_0755(dst)?;

        // One 0600 secrets file for the whole tree; unlinked on return.
        let secrets_file = write_secrets_file(secrets)?;
        let secrets_path = secrets_file.path().to_path_buf();

        let mut stats = RenderStats::default();
        let mut pending = vec![src.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current).map_err(|e| {
                RenderError::Fs(FsOpsError::Io { action: "read dir", path: current.clone(), source: e })
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| {
                    RenderError::Fs(FsOpsError::Io {
                        action: "read dir",
                        path: current.clone(),
                        source: e,
                    })
                })?;
                let path = entry.path();
                let name = entry.file_name();
                if path.is_dir() {
                    if name == ".git" {
                        continue;
                    }
                    pending.push(path);
                    continue;
                }
                // Relative placement mirrors the repo layout.
                let rel = path.strip_prefix(src).unwrap_or(&path);
                let rel_str = rel.to_string_lossy();
                if let Some(out_rel) = rel_str.strip_suffix(&self.suffix) {
                    let out = dst.join(out_rel);
                    self.render_file(&path, &out, &secrets_path, cancel).await?;
                    stats.rendered += 1;
                } else {
                    fsops::copy_file(&path, &dst.join(rel))?;
                    stats.copied += 1;
                }
            }
        }
        debug!(rendered = stats.rendered, copied = stats.copied, "template tree rendered");
        Ok(stats)
    }

    async fn render_file(
        &self,
        input: &Path,
        output: &Path,
        secrets_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), RenderError> {
        if let Some(parent) = output.parent() {
            fsops::create_dir_0755(parent)?;
        }
        let mut cmd = Command::new(&self.tool);
        cmd.arg(input).arg("-o").arg(output);
        cmd.env_clear();
        for (name, value) in std::env::vars() {
            if env_allowed(&name) {
                cmd.env(&name, &value);
            }
        }
        cmd.env(SECRETS_PATH_ENV, secrets_path);

        let out = run_with_timeout(&mut cmd, &self.tool, self.timeout, cancel).await?;
        if !out.success {
            return Err(RenderError::RenderFailed {
                path: input.to_path_buf(),
                stderr: truncate_bytes(&out.stderr, 500).to_string(),
            });
        }
        Ok(())
    }
}

/// Write the secret tree to a fresh 0600 temp file.
fn write_secrets_file(secrets: &Value) -> Result<tempfile::NamedTempFile, RenderError> {
    let mut file = tempfile::NamedTempFile::new().map_err(|source| RenderError::SecretsFile { source })?;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(file.path(), perms)
        .map_err(|source| RenderError::SecretsFile { source })?;
    let body = serde_json::to_vec(secrets).unwrap_or_default();
    file.write_all(&body).map_err(|source| RenderError::SecretsFile { source })?;
    file.flush().map_err(|source| RenderError::SecretsFile { source })?;
    Ok(file)
}

#[cfg(test)]
#[path = "render_tests.rs"]
mod tests;
