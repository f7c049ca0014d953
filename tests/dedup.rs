mod common;

use sentinel_core::{FileStatus, OperationType, ScanScope, SentinelError};
use tempfile::tempdir;

#[tokio::test]
async fn three_copies_clean_down_to_one() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let files = dir.path().join("files");
    let contents = b"the same holiday photo";
    common::write(&files, "a.jpg", contents);
    common::write(&files.join("nested"), "b.jpg", contents);
    common::write(&files, "c.jpg", contents);
    common::write(&files, "unique.jpg", b"something else entirely");

    let groups = engine.scan(&ScanScope::single(&files)).unwrap();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.members.len(), 3);
    assert_eq!(group.total_size, 3 * contents.len() as u64);

    let result = engine.clean(group, 1).unwrap();
    assert_eq!(result.kept, group.members[1].path);
    assert_eq!(result.removed.len(), 2);
    assert!(result.failed.is_empty());

    let survivors: Vec<_> = group.members.iter().filter(|m| m.path.exists()).collect();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].path, group.members[1].path);

    let dedup_ops: Vec<_> = engine
        .operations()
        .into_iter()
        .filter(|op| op.op_type == OperationType::DedupRemove)
        .collect();
    assert_eq!(dedup_ops.len(), 2);
    for op in &dedup_ops {
        assert!(op.new_path.starts_with(engine.config().recycle_dir()));
        assert!(op.new_path.is_file());
        let record = engine.file(&op.new_path).unwrap().unwrap();
        assert_eq!(record.status, FileStatus::DuplicateRemoved);
    }
    engine.close().await.unwrap();
}

#[tokio::test]
async fn cleanup_is_undoable() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let files = dir.path().join("files");
    common::write(&files, "a.txt", b"dup");
    common::write(&files, "b.txt", b"dup");

    let groups = engine.scan(&ScanScope::single(&files)).unwrap();
    let result = engine.clean(&groups[0], 0).unwrap();
    let (removed_path, id) = result.removed[0].clone();
    assert!(!removed_path.exists());

    engine.undo(id).unwrap();
    assert!(removed_path.is_file());
    engine.close().await.unwrap();
}

#[tokio::test]
async fn invalid_clean_requests_are_rejected() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let files = dir.path().join("files");
    common::write(&files, "a.txt", b"dup");
    common::write(&files, "b.txt", b"dup");

    let groups = engine.scan(&ScanScope::single(&files)).unwrap();
    let mut group = groups[0].clone();
    assert!(matches!(engine.clean(&group, 2), Err(SentinelError::Validation(_))));

    group.members.truncate(1);
    assert!(matches!(engine.clean(&group, 0), Err(SentinelError::Conflict(_))));
    assert!(files.join("a.txt").is_file());
    assert!(files.join("b.txt").is_file());
    engine.close().await.unwrap();
}
