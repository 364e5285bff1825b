// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::os::unix::fs::PermissionsExt;

#[test]
fn copy_file_preserves_content_and_mode() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src.sh");
    fs::write(&src, "#!/bin/sh\necho hi\n").unwrap();
    fs::set_permissions(&src, fs::Permissions::from_mode(0o750)).unwrap();

    let dst = dir.path().join("nested/deeply/dst.sh");
    copy_file(&src, &dst).unwrap();

    assert_eq!(fs::read_to_string(&dst).unwrap(), "#!/bin/sh\necho hi\n");
    assert_eq!(fs::metadata(&dst).unwrap().permissions().mode() & 0o777, 0o750);
}

#[test]
fn copy_file_replaces_existing_destination() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::write(&src, "new").unwrap();
    fs::write(&dst, "old").unwrap();

    copy_file(&src, &dst).unwrap();
    assert_eq!(fs::read_to_string(&dst).unwrap(), "new");
}

#[test]
fn copy_file_rejects_symlink_source() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target");
    fs::write(&target, "x").unwrap();
    let link = dir.path().join("link");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let err = copy_file(&link, &dir.path().join("dst")).unwrap_err();
    assert!(matches!(err, FsOpsError::SymlinkUnsupported { .. }));
}

#[test]
fn copy_file_missing_source_leaves_no_temp() {
    let dir = tempfile::tempdir().unwrap();
    let err = copy_file(&dir.path().join("absent"), &dir.path().join("dst")).unwrap_err();
    assert!(matches!(err, FsOpsError::Io { .. }));
    let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[test]
fn copy_tree_mirrors_structure() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("a/b")).unwrap();
    fs::write(src.join("top.txt"), "top").unwrap();
    fs::write(src.join("a/b/leaf.txt"), "leaf").unwrap();

    let dst = dir.path().join("dst");
    copy_tree(&src, &dst).unwrap();

    assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
    assert_eq!(fs::read_to_string(dst.join("a/b/leaf.txt")).unwrap(), "leaf");
}

#[test]
fn copy_tree_rejects_nested_symlink() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("real"), "x").unwrap();
    std::os::unix::fs::symlink(src.join("real"), src.join("alias")).unwrap();

    let err = copy_tree(&src, &dir.path().join("dst")).unwrap_err();
    assert!(matches!(err, FsOpsError::SymlinkUnsupported { .. }));
}

#[test]
fn copy_tree_rejects_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("plain");
    fs::write(&src, "x").unwrap();
    let err = copy_tree(&src, &dir.path().join("dst")).unwrap_err();
    assert!(matches!(err, FsOpsError::NotADirectory { .. }));
}
