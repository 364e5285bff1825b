// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Drop a fake `ssh` script into `dir` that prints `stderr_line` and
/// exits 255, the way a real ssh failure does.
fn fake_ssh(dir: &Path, stderr_line: &str) -> String {
    let path = dir.join("ssh");
    std::fs::write(&path, format!("#!/bin/sh\necho '{stderr_line}' >&2\nexit 255\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn probe_rejects_bad_host_before_spawning() {
    let err = probe("ssh", "host;reboot", HostKeyPolicy::KnownHosts, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SshError::Validate(_)));
}

#[yare::parameterized(
    auth = { "root@tower: Permission denied (publickey)", "authentication failed" },
    refused = { "connect to host tower port 22: Connection refused", "connection refused" },
    host_key = { "Host key verification failed.", "host key verification failed" },
    no_route = { "connect to host tower port 22: No route to host", "no route" },
    timeout = { "connect to host tower port 22: Connection timed out", "timed out" },
    dns = { "ssh: Could not resolve hostname tower: Name or service not known", "does not resolve" },
)]
fn stderr_classification(stderr: &str, expected_fragment: &str) {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let ssh = fake_ssh(dir.path(), stderr);
        let err = probe(&ssh, "tower", HostKeyPolicy::KnownHosts, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            err.to_string().to_lowercase().contains(expected_fragment),
            "expected {expected_fragment:?} in {err}"
        );
    });
}

#[tokio::test]
async fn probe_succeeds_on_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ssh");
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    let ssh = path.to_string_lossy().into_owned();
    probe(&ssh, "tower", HostKeyPolicy::AcceptNew, &CancellationToken::new()).await.unwrap();
}

#[test]
fn host_key_policy_knob_round_trips() {
    assert_eq!(HostKeyPolicy::parse("known-hosts"), Some(HostKeyPolicy::KnownHosts));
    assert_eq!(HostKeyPolicy::parse("accept-new"), Some(HostKeyPolicy::AcceptNew));
    assert_eq!(HostKeyPolicy::parse("insecure"), Some(HostKeyPolicy::Insecure));
    assert_eq!(HostKeyPolicy::parse("trust-everyone"), None);
    assert_eq!(HostKeyPolicy::KnownHosts.ssh_option(), "yes");
}
