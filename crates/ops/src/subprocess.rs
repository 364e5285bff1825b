// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single choke-point for spawning subprocesses.
//!
//! Every external tool invocation goes through [`run_with_timeout`] so
//! that deadlines, cancellation, and stderr capture behave identically
//! across git, sops, tar, ssh, and docker.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub success: bool,
}

impl CmdOutput {
    /// Convert a non-zero exit into [`CmdError::Failed`].
    pub fn into_ok(self, program: &str) -> Result<CmdOutput, CmdError> {
        if self.success {
            Ok(self)
        } else {
            Err(CmdError::Failed {
                program: program.to_string(),
                code: self.code.unwrap_or(-1),
                stderr: self.stderr,
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum CmdError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} cancelled")]
    Cancelled { program: String },

    #[error("{program} exited with status {code}: {stderr}")]
    Failed { program: String, code: i32, stderr: String },

    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl CmdError {
    /// The message retry matches its transient patterns against.
    pub fn retry_text(&self) -> String {
        self.to_string()
    }
}

/// Run a prepared command to completion, capturing stdout and stderr.
///
/// The child is killed if the deadline elapses or the token fires first;
/// `kill_on_drop` guarantees no orphan survives either path. Exit status
/// is reported in the output, not converted to an error — callers that
/// require success chain [`CmdOutput::into_ok`].
pub async fn run_with_timeout(
    cmd: &mut Command,
    program: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CmdOutput, CmdError> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|source| CmdError::Spawn { program: program.to_string(), source })?;

    let waited = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(CmdError::Cancelled { program: program.to_string() });
        }
        waited = tokio::time::timeout(timeout, child.wait_with_output()) => waited,
    };

    let output = match waited {
        Err(_) => return Err(CmdError::Timeout { program: program.to_string(), timeout }),
        Ok(result) => {
            result.map_err(|source| CmdError::Io { program: program.to_string(), source })?
        }
    };

    let out = CmdOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
        success: output.status.success(),
    };
    debug!(program, code = ?out.code, "subprocess finished");
    Ok(out)
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
