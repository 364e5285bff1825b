// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::deploy::tests::local_tools;

fn make_appdata(root: &Path) -> PathBuf {
    let appdata = root.join("appdata");
    std::fs::create_dir_all(appdata.join("plex")).unwrap();
    std::fs::write(appdata.join("compose.yml"), "services: {}\n").unwrap();
    std::fs::write(appdata.join("plex/plex.conf"), "port=32400\n").unwrap();
    appdata
}

#[tokio::test]
async fn local_backup_creates_verified_archive() {
    let dir = tempfile::tempdir().unwrap();
    let appdata = make_appdata(dir.path());
    let root = dir.path().join("backups");
    let tools = DeployTools::default();

    let handle =
        create_local(&tools, &root, &[appdata.clone()], &CancellationToken::new()).await.unwrap();

    assert!(handle.archive.is_file());
    assert!(handle.dir.file_name().unwrap().to_string_lossy().starts_with("backup-"));
    assert!(verify(&tools, &handle.archive, &CancellationToken::new()).await);
    assert_eq!(latest(&root).unwrap().dir, handle.dir);
}

#[tokio::test]
async fn missing_paths_are_tolerated_when_archive_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let appdata = make_appdata(dir.path());
    let root = dir.path().join("backups");
    let tools = DeployTools::default();

    // One real path, one missing: tar exits non-zero but archives the rest.
    let handle = create_local(
        &tools,
        &root,
        &[appdata, dir.path().join("does-not-exist")],
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(verify(&tools, &handle.archive, &CancellationToken::new()).await);
}

#[tokio::test]
async fn all_paths_missing_deletes_the_backup_dir() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("backups");
    let tools = DeployTools::default();

    let err = create_local(
        &tools,
        &root,
        &[dir.path().join("nope-a"), dir.path().join("nope-b")],
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BackupError::VerifyFailed { .. }));

    // The failed backup directory is gone.
    let survivors = std::fs::read_dir(&root)
        .map(|rd| rd.count())
        .unwrap_or(0);
    assert_eq!(survivors, 0);
}

#[tokio::test]
async fn remote_backup_streams_to_local_archive() {
    let dir = tempfile::tempdir().unwrap();
    let appdata = make_appdata(dir.path());
    let root = dir.path().join("backups");
    let tools = local_tools(dir.path());

    let handle = create_remote(
        &tools,
        &root,
        "tower",
        &[appdata.to_string_lossy().into_owned()],
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(verify(&tools, &handle.archive, &CancellationToken::new()).await);
}

#[test]
fn verify_rejects_empty_and_garbage() {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let tools = DeployTools::default();
        let cancel = CancellationToken::new();

        let absent = dir.path().join("absent.tar.gz");
        assert!(!verify(&tools, &absent, &cancel).await);

        let empty = dir.path().join("empty.tar.gz");
        std::fs::write(&empty, b"").unwrap();
        assert!(!verify(&tools, &empty, &cancel).await);

        let garbage = dir.path().join("garbage.tar.gz");
        std::fs::write(&garbage, b"not a tarball").unwrap();
        assert!(!verify(&tools, &garbage, &cancel).await);
    });
}

#[test]
fn prune_keeps_the_newest_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("backups");
    for stamp in
        ["20250101-000000", "20250102-000000", "20250103-000000", "20250104-000000"]
    {
        std::fs::create_dir_all(root.join(format!("backup-{stamp}"))).unwrap();
    }
    // A non-backup directory is never touched.
    std::fs::create_dir_all(root.join("scratch")).unwrap();

    let removed = prune(&root, 2).unwrap();
    assert_eq!(removed, 2);

    let mut kept: Vec<String> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    kept.sort();
    assert_eq!(kept, vec!["backup-20250103-000000", "backup-20250104-000000", "scratch"]);
}

#[test]
fn prune_with_fewer_than_keep_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("backups");
    std::fs::create_dir_all(root.join("backup-20250101-000000")).unwrap();
    assert_eq!(prune(&root, 5).unwrap(), 0);
    assert_eq!(prune(&dir.path().join("never-created"), 5).unwrap(), 0);
}
