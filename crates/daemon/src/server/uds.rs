// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer-credential connect info for the Unix socket listener.
//!
//! On Linux the kernel reports the connecting process's uid/gid/pid
//! (`SO_PEERCRED`); that triple rides through every request for audit
//! logs and trigger sources. Where the platform cannot supply it, the
//! fields degrade to unknowns and `/config` security reduces to the
//! socket's directory and file modes.

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use tokio::net::UnixListener;

#[derive(Clone, Debug)]
pub struct UdsConnectInfo {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

impl UdsConnectInfo {
    /// Trigger-source tag carrying the peer identity.
    pub fn source_label(&self) -> String {
        match self.pid {
            Some(pid) => format!("socket (uid={},gid={},pid={})", self.uid, self.gid, pid),
            None => format!("socket (uid={},gid={})", self.uid, self.gid),
        }
    }
}

impl Connected<IncomingStream<'_, UnixListener>> for UdsConnectInfo {
    fn connect_info(stream: IncomingStream<'_, UnixListener>) -> Self {
        match stream.io().peer_cred() {
            Ok(cred) => Self { uid: cred.uid(), gid: cred.gid(), pid: cred.pid() },
            Err(_) => Self { uid: u32::MAX, gid: u32::MAX, pid: None },
        }
    }
}
