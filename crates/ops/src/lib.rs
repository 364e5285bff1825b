// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! keel-ops: every operation that leaves the process.
//!
//! Git transport, secret decryption, template rendering, and deployment
//! all happen through external tools. This crate owns those subprocess
//! seams: one spawn choke-point with timeouts and cancellation, boundary
//! validation before any string reaches an argv, transient-error retry
//! for the remote operations, and atomic filesystem staging.

pub mod backup;
pub mod compose;
pub mod deploy;
pub mod fsops;
pub mod git;
pub mod render;
pub mod retry;
pub mod secrets;
pub mod ssh;
pub mod subprocess;

pub use backup::{BackupError, BackupHandle};
pub use compose::{ComposeError, ComposeRunner, ComposeTarget};
pub use deploy::{DeployError, DeployTools};
pub use fsops::FsOpsError;
pub use git::{GitError, GitRepo, GitTimeouts, SyncOutcome};
pub use render::{RenderError, Renderer, RenderStats, SECRETS_PATH_ENV};
pub use retry::{is_transient, retry_transient, RetryError};
pub use secrets::{Decryptor, SecretsError};
pub use ssh::{HostKeyPolicy, SshError};
pub use subprocess::{run_with_timeout, CmdError, CmdOutput};
