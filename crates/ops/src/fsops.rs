// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic file and tree copies.
//!
//! Everything lands via a sibling temp path plus rename so a crash or
//! failure mid-copy never leaves a half-written destination. Symlinks
//! are rejected outright; the rendered tree must not be able to alias
//! files outside the staging area.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsOpsError {
    #[error("symlinks are not supported: {path}")]
    SymlinkUnsupported { path: PathBuf },

    #[error("not a regular file: {path}")]
    NotAFile { path: PathBuf },

    #[error("not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("{action} failed for {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(action: &'static str, path: &Path, source: io::Error) -> FsOpsError {
    FsOpsError::Io { action, path: path.to_path_buf(), source }
}

/// Create `dir` and any missing parents with mode 0755.
pub fn create_dir_0755(dir: &Path) -> Result<(), FsOpsError> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(|e| io_err("create dir", dir, e))
}

/// Sibling temp path for `dst`, unique per call.
pub(crate) fn sibling_temp(dst: &Path) -> PathBuf {
    let name = dst.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let nonce = nanoid::nanoid!(8);
    dst.with_file_name(format!(".{name}.tmp.{nonce}"))
}

/// Copy a regular file atomically.
///
/// Writes into a sibling temp file, fsyncs, matches the source mode,
/// then renames over `dst`. The temp file is removed on any failure, so
/// `dst` is either untouched or fully replaced.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), FsOpsError> {
    let meta = fs::symlink_metadata(src).map_err(|e| io_err("stat", src, e))?;
    if meta.file_type().is_symlink() {
        return Err(FsOpsError::SymlinkUnsupported { path: src.to_path_buf() });
    }
    if !meta.file_type().is_file() {
        return Err(FsOpsError::NotAFile { path: src.to_path_buf() });
    }

    if let Some(parent) = dst.parent() {
        create_dir_0755(parent)?;
    }

    let tmp = sibling_temp(dst);
    let result = write_and_rename(src, dst, &tmp, &meta);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(
    src: &Path,
    dst: &Path,
    tmp: &Path,
    src_meta: &fs::Metadata,
) -> Result<(), FsOpsError> {
    let mut reader = fs::File::open(src).map_err(|e| io_err("open", src, e))?;
    let mut writer = fs::File::create(tmp).map_err(|e| io_err("create", tmp, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| io_err("copy", tmp, e))?;
    writer.sync_all().map_err(|e| io_err("fsync", tmp, e))?;
    drop(writer);
    fs::set_permissions(tmp, src_meta.permissions()).map_err(|e| io_err("chmod", tmp, e))?;
    fs::rename(tmp, dst).map_err(|e| io_err("rename", dst, e))
}

/// Mirror a directory tree with [`copy_file`] semantics per file.
///
/// Directories are created as encountered; symlinks anywhere in the
/// tree abort the copy.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), FsOpsError> {
    let meta = fs::symlink_metadata(src).map_err(|e| io_err("stat", src, e))?;
    if meta.file_type().is_symlink() {
        return Err(FsOpsError::SymlinkUnsupported { path: src.to_path_buf() });
    }
    if !meta.is_dir() {
        return Err(FsOpsError::NotADirectory { path: src.to_path_buf() });
    }
    create_dir_0755(dst)?;

    for entry in fs::read_dir(src).map_err(|e| io_err("read dir", src, e))? {
        let entry = entry.map_err(|e| io_err("read dir", src, e))?;
        let entry_src = entry.path();
        let entry_dst = dst.join(entry.file_name());
        let entry_meta =
            fs::symlink_metadata(&entry_src).map_err(|e| io_err("stat", &entry_src, e))?;
        if entry_meta.file_type().is_symlink() {
            return Err(FsOpsError::SymlinkUnsupported { path: entry_src });
        }
        if entry_meta.is_dir() {
            copy_tree(&entry_src, &entry_dst)?;
        } else {
            copy_file(&entry_src, &entry_dst)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "fsops_tests.rs"]
mod tests;
