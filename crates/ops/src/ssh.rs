// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH connectivity probe and the shared host-key policy.

use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use keel_core::validate::{validate_host, ValidateError};

use crate::subprocess::{run_with_timeout, CmdError};

/// How ssh/scp/git verify the remote host key.
///
/// The default is strict `known_hosts` verification. `AcceptNew` trusts
/// a host on first contact; `Insecure` disables verification entirely
/// and exists for air-gapped lab setups only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    #[default]
    KnownHosts,
    AcceptNew,
    Insecure,
}

impl HostKeyPolicy {
    /// Value for `-o StrictHostKeyChecking=`.
    pub fn ssh_option(self) -> &'static str {
        match self {
            HostKeyPolicy::KnownHosts => "yes",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Insecure => "no",
        }
    }

    /// Parse the config knob value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "known-hosts" => Some(HostKeyPolicy::KnownHosts),
            "accept-new" => Some(HostKeyPolicy::AcceptNew),
            "insecure" => Some(HostKeyPolicy::Insecure),
            _ => None,
        }
    }
}

/// Probe failures, classified from ssh stderr into actionable messages.
#[derive(Debug, Error)]
pub enum SshError {
    #[error(transparent)]
    Validate(#[from] ValidateError),

    #[error("SSH authentication failed for {host}: check keys and authorized_users")]
    AuthFailed { host: String },

    #[error("SSH connection refused by {host}: is sshd running?")]
    ConnectionRefused { host: String },

    #[error("host key verification failed for {host}: update known_hosts")]
    HostKeyFailed { host: String },

    #[error("no route to {host}: check the network path")]
    NoRoute { host: String },

    #[error("connection to {host} timed out")]
    ConnectTimeout { host: String },

    #[error("hostname {host} does not resolve")]
    NameNotKnown { host: String },

    #[error("SSH probe of {host} failed: {stderr}")]
    Other { host: String, stderr: String },

    #[error(transparent)]
    Cmd(#[from] CmdError),
}

/// Classify ssh stderr into one of the well-known failure modes.
fn classify(host: &str, stderr: &str) -> SshError {
    let lower = stderr.to_lowercase();
    let host = host.to_string();
    if lower.contains("permission denied") {
        SshError::AuthFailed { host }
    } else if lower.contains("connection refused") {
        SshError::ConnectionRefused { host }
    } else if lower.contains("host key verification failed") {
        SshError::HostKeyFailed { host }
    } else if lower.contains("no route to host") {
        SshError::NoRoute { host }
    } else if lower.contains("connection timed out") {
        SshError::ConnectTimeout { host }
    } else if lower.contains("name or service not known") {
        SshError::NameNotKnown { host }
    } else {
        SshError::Other { host, stderr: keel_core::truncate_bytes(stderr, 500).to_string() }
    }
}

/// Check that `host` is reachable and accepts our key.
///
/// Runs `ssh -o ConnectTimeout=5 -o BatchMode=yes <host> exit 0` with a
/// hard 5-second deadline on top of ssh's own connect timeout.
pub async fn probe(
    ssh_bin: &str,
    host: &str,
    policy: HostKeyPolicy,
    cancel: &CancellationToken,
) -> Result<(), SshError> {
    validate_host(host)?;
    let strict = format!("StrictHostKeyChecking={}", policy.ssh_option());
    let mut cmd = Command::new(ssh_bin);
    cmd.args([
        "-o",
        "ConnectTimeout=5",
        "-o",
        "BatchMode=yes",
        "-o",
        strict.as_str(),
        host,
        "exit",
        "0",
    ]);
    let out = run_with_timeout(&mut cmd, "ssh", Duration::from_secs(5), cancel).await?;
    if out.success {
        Ok(())
    } else {
        Err(classify(host, &out.stderr))
    }
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod tests;
