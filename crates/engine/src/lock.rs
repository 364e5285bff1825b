// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory file lock guarding the reconcile pipeline.
//!
//! Two daemons on one host must never deploy concurrently. The lock is
//! per-host only; each host runs at most one daemon instance.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

/// Held for the duration of one reconcile; released on drop.
pub struct RunLock {
    // NOTE(lifetime): held to maintain the exclusive flock
    #[allow(dead_code)]
    file: File,
}

impl RunLock {
    /// Non-blocking exclusive acquire. `None` means another process (or
    /// run) holds the lock.
    pub fn try_acquire(path: &Path) -> std::io::Result<Option<RunLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Never truncate before holding the lock; the holder's PID would
        // be wiped.
        let mut file =
            std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Some(RunLock { file }))
    }
}
