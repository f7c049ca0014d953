use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::io::{move_file, path_occupied};
use super::locks::PathLocks;
use super::pending::{PendingJournal, PendingKind, PendingMove};
use crate::error::{Result, SentinelError};
use crate::fingerprint::fingerprint_file;
use crate::models::{
    BulkUndoResult, FileStatus, Operation, OperationRequest, OperationStatus, OperationType,
    UndoFailure, UndoOutcome,
};
use crate::security::PathValidator;
use crate::storage::{queries, Store};

/// An active operation whose file no longer matches the log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationDrift {
    pub operation_id: u64,
    pub new_path: PathBuf,
    pub reason: String,
}

/// Append-only record of every move the engine performs
///
/// `record` and `undo` are the only code paths that move files. Both move
/// first and append second, so a committed entry always describes a move that
/// happened. Reads go through a copy-on-write snapshot and never wait on the
/// database.
pub struct RollbackLog {
    store: Store,
    journal: PendingJournal,
    locks: PathLocks,
    snapshot: RwLock<Arc<Vec<Operation>>>,
}

impl RollbackLog {
    /// Load the log and resolve moves interrupted by a previous crash
    pub fn open(store: Store, pending_dir: PathBuf) -> Result<Self> {
        let operations = store.with_conn(queries::load_operations)?;
        let log = Self {
            store,
            journal: PendingJournal::new(pending_dir),
            locks: PathLocks::new(),
            snapshot: RwLock::new(Arc::new(operations)),
        };

        let recovered = log.recover_pending()?;
        info!(
            operations = log.snapshot().len(),
            recovered,
            "Rollback log opened"
        );
        Ok(log)
    }

    // ============ Writes ============

    /// Move a file and append the entry describing the move
    pub fn record(&self, request: OperationRequest) -> Result<u64> {
        if request.op_type == OperationType::Restore {
            return Err(SentinelError::Validation(
                "Restore entries are appended by undo only".to_string(),
            ));
        }
        PathValidator::validate_move(&request.original_path, &request.new_path)?;

        let _guard = self
            .locks
            .acquire(&[&request.original_path, &request.new_path]);

        if !request.original_path.is_file() {
            return Err(SentinelError::NotFound(format!(
                "File not found: {}",
                request.original_path.display()
            )));
        }
        if path_occupied(&request.new_path) {
            return Err(SentinelError::Conflict(format!(
                "Destination already exists: {}",
                request.new_path.display()
            )));
        }

        let size = std::fs::metadata(&request.original_path)?.len();
        let fingerprint = fingerprint_file(&request.original_path)?;

        let intent = PendingMove::new(
            PendingKind::Record {
                request: request.clone(),
            },
            request.original_path.clone(),
            request.new_path.clone(),
            fingerprint.clone(),
            size,
        );
        self.journal.write(&intent)?;

        if let Err(e) = move_file(&request.original_path, &request.new_path) {
            self.journal.clear(intent.intent_id);
            return Err(e.into());
        }

        let mut op = Operation {
            operation_id: 0,
            op_type: request.op_type,
            original_path: request.original_path.clone(),
            new_path: request.new_path.clone(),
            fingerprint,
            size,
            timestamp: log_time(),
            confidence: request.confidence.clamp(0.0, 1.0),
            status: OperationStatus::Active,
            reverses: None,
            undone_at: None,
        };

        match self.append_record(&op) {
            Ok(id) => op.operation_id = id,
            Err(e) => {
                let reverted = self.move_back(&request.new_path, &request.original_path, &intent);
                return Err(storage_failure(e, reverted));
            }
        }
        self.journal.clear(intent.intent_id);

        info!(
            operation_id = op.operation_id,
            op_type = op.op_type.as_str(),
            from = %op.original_path.display(),
            to = %op.new_path.display(),
            confidence = op.confidence,
            "Operation recorded"
        );
        let id = op.operation_id;
        self.publish(|ops| insert_sorted(ops, op));
        Ok(id)
    }

    /// Move the file of an active operation back and append the inverse entry
    pub fn undo(&self, operation_id: u64) -> Result<UndoOutcome> {
        let op = self.load_undoable(operation_id)?;
        let _guard = self.locks.acquire(&[&op.new_path, &op.original_path]);

        // Another caller may have undone it while we waited for the lock
        let op = self.load_undoable(operation_id)?;

        if !op.new_path.is_file() {
            return Err(SentinelError::Conflict(format!(
                "File for operation {} is no longer at {}",
                operation_id,
                op.new_path.display()
            )));
        }
        let current = fingerprint_file(&op.new_path)
            .map_err(|e| SentinelError::Conflict(format!("Cannot verify operation {}: {}", operation_id, e)))?;
        if current != op.fingerprint {
            return Err(SentinelError::Conflict(format!(
                "File for operation {} was modified since it was recorded",
                operation_id
            )));
        }
        if path_occupied(&op.original_path) {
            return Err(SentinelError::Conflict(format!(
                "Original location is occupied: {}",
                op.original_path.display()
            )));
        }

        let intent = PendingMove::new(
            PendingKind::Undo { operation_id },
            op.new_path.clone(),
            op.original_path.clone(),
            op.fingerprint.clone(),
            op.size,
        );
        self.journal.write(&intent)?;

        if let Err(e) = move_file(&op.new_path, &op.original_path) {
            self.journal.clear(intent.intent_id);
            return Err(e.into());
        }

        let (restore, undone_at) = match self.append_undo(&op) {
            Ok(appended) => appended,
            Err(e) => {
                let reverted = self.move_back(&op.original_path, &op.new_path, &intent);
                return Err(storage_failure(e, reverted));
            }
        };
        self.journal.clear(intent.intent_id);

        info!(
            operation_id,
            restore_id = restore.operation_id,
            path = %op.original_path.display(),
            "Operation undone"
        );

        let outcome = UndoOutcome {
            operation_id,
            restore_id: restore.operation_id,
            restored_path: op.original_path.clone(),
        };
        self.publish(|ops| {
            if let Some(existing) = ops.iter_mut().find(|o| o.operation_id == operation_id) {
                existing.status = OperationStatus::Undone;
                existing.undone_at = Some(undone_at);
            }
            insert_sorted(ops, restore);
        });
        Ok(outcome)
    }

    /// Undo every active operation with `timestamp >= since`, newest first
    ///
    /// Each item is attempted independently. When `cancel` is set the batch
    /// stops before the next item and reports the rest as not attempted.
    pub fn undo_all_since(
        &self,
        since: DateTime<Utc>,
        cancel: Option<&AtomicBool>,
    ) -> BulkUndoResult {
        let mut targets = self.active_since(since);
        targets.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.operation_id.cmp(&a.operation_id))
        });

        let mut result = BulkUndoResult::default();
        for (index, op) in targets.iter().enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                result.cancelled = true;
                result.not_attempted = targets[index..].iter().map(|o| o.operation_id).collect();
                break;
            }

            match self.undo(op.operation_id) {
                Ok(_) => {
                    result.files_restored += 1;
                    result.restored.push(op.operation_id);
                }
                Err(e) => {
                    warn!(operation_id = op.operation_id, error = %e, "Bulk undo item failed");
                    result.failed.push(UndoFailure {
                        operation_id: op.operation_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            since = %since,
            restored = result.files_restored,
            failed = result.failed.len(),
            not_attempted = result.not_attempted.len(),
            "Bulk undo finished"
        );
        result
    }

    // ============ Reads ============

    /// Point-in-time view of the whole log, ordered by id
    pub fn snapshot(&self) -> Arc<Vec<Operation>> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.snapshot().as_ref().clone()
    }

    pub fn get(&self, operation_id: u64) -> Option<Operation> {
        self.snapshot()
            .iter()
            .find(|op| op.operation_id == operation_id)
            .cloned()
    }

    pub fn active_since(&self, since: DateTime<Utc>) -> Vec<Operation> {
        self.snapshot()
            .iter()
            .filter(|op| op.is_active() && op.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Most recent active operation that moved a file away from `path`
    pub fn find_active_from(&self, path: &Path) -> Option<Operation> {
        self.snapshot()
            .iter()
            .rev()
            .find(|op| op.is_active() && op.original_path == path)
            .cloned()
    }

    /// Most recent active operation that placed a file at `path`
    pub fn find_active_to(&self, path: &Path) -> Option<Operation> {
        self.snapshot()
            .iter()
            .rev()
            .find(|op| op.is_active() && op.new_path == path)
            .cloned()
    }

    /// Whether a move touching `path` is in flight right now
    pub fn is_busy(&self, path: &Path) -> bool {
        self.locks.is_held(path)
    }

    /// Active operations whose file is missing or changed at `new_path`
    pub fn verify(&self) -> Vec<OperationDrift> {
        let snapshot = self.snapshot();
        let mut drift = Vec::new();

        for op in snapshot.iter().filter(|op| op.is_active()) {
            let reason = if !op.new_path.is_file() {
                Some("file missing".to_string())
            } else {
                match fingerprint_file(&op.new_path) {
                    Ok(fp) if fp == op.fingerprint => None,
                    Ok(_) => Some("content changed".to_string()),
                    Err(e) => Some(e.to_string()),
                }
            };

            if let Some(reason) = reason {
                drift.push(OperationDrift {
                    operation_id: op.operation_id,
                    new_path: op.new_path.clone(),
                    reason,
                });
            }
        }

        if !drift.is_empty() {
            warn!(count = drift.len(), "Active operations drifted out-of-band");
        }
        drift
    }

    // ============ Internals ============

    fn load_undoable(&self, operation_id: u64) -> Result<Operation> {
        let op = self
            .store
            .with_conn(|conn| queries::get_operation(conn, operation_id))?
            .ok_or_else(|| queries::not_found("Operation", operation_id))?;

        match op.status {
            OperationStatus::Active => Ok(op),
            OperationStatus::Undone => Err(SentinelError::Conflict(format!(
                "Operation {} is already undone",
                operation_id
            ))),
            OperationStatus::Inverse => Err(SentinelError::Conflict(format!(
                "Operation {} is a restore entry and cannot be undone",
                operation_id
            ))),
        }
    }

    fn append_record(&self, op: &Operation) -> Result<u64> {
        self.store.transaction(|tx| {
            let id = queries::insert_operation(tx, op)?;
            let status = match op.op_type {
                OperationType::DedupRemove => FileStatus::DuplicateRemoved,
                OperationType::Rename => queries::get_file(tx, &op.original_path)?
                    .map(|f| f.status)
                    .unwrap_or(FileStatus::Observed),
                _ => FileStatus::Organized,
            };
            queries::move_file_record(
                tx,
                &op.original_path,
                &op.new_path,
                &op.fingerprint,
                op.size,
                status,
            )?;
            Ok(id)
        })
    }

    fn append_undo(&self, op: &Operation) -> Result<(Operation, DateTime<Utc>)> {
        let now = log_time();
        let mut restore = Operation {
            operation_id: 0,
            op_type: OperationType::Restore,
            original_path: op.new_path.clone(),
            new_path: op.original_path.clone(),
            fingerprint: op.fingerprint.clone(),
            size: op.size,
            timestamp: now,
            confidence: 1.0,
            status: OperationStatus::Inverse,
            reverses: Some(op.operation_id),
            undone_at: None,
        };

        restore.operation_id = self.store.transaction(|tx| {
            if !queries::mark_operation_undone(tx, op.operation_id, now)? {
                return Err(SentinelError::Conflict(format!(
                    "Operation {} is no longer active",
                    op.operation_id
                )));
            }
            let id = queries::insert_operation(tx, &restore)?;
            queries::move_file_record(
                tx,
                &op.new_path,
                &op.original_path,
                &op.fingerprint,
                op.size,
                FileStatus::Observed,
            )?;
            Ok(id)
        })?;

        Ok((restore, now))
    }

    /// Reverse a move whose log entry could not be written
    ///
    /// The intent is cleared only once the file is back. If the reversal
    /// fails the intent stays on disk and the next `open` logs the move.
    fn move_back(&self, from: &Path, to: &Path, intent: &PendingMove) -> bool {
        match move_file(from, to) {
            Ok(()) => {
                self.journal.clear(intent.intent_id);
                true
            }
            Err(e) => {
                tracing::error!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    intent = %intent.intent_id,
                    "Failed to reverse unrecorded move, intent kept for recovery"
                );
                false
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut Vec<Operation>)) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        update(Arc::make_mut(&mut guard));
    }

    /// Resolve intents left behind by a crash. Returns how many moves were
    /// appended to the log.
    fn recover_pending(&self) -> Result<usize> {
        let mut recovered = 0;

        for intent in self.journal.list() {
            let completed = move_completed(&intent);
            match &intent.kind {
                PendingKind::Record { request } => {
                    let already_logged = self.snapshot().iter().any(|op| {
                        op.op_type == request.op_type
                            && op.original_path == intent.from
                            && op.new_path == intent.to
                            && op.fingerprint == intent.fingerprint
                            && op.timestamp >= intent.started_at
                    });

                    if completed && !already_logged {
                        let mut op = Operation {
                            operation_id: 0,
                            op_type: request.op_type,
                            original_path: intent.from.clone(),
                            new_path: intent.to.clone(),
                            fingerprint: intent.fingerprint.clone(),
                            size: intent.size,
                            timestamp: log_time(),
                            confidence: request.confidence.clamp(0.0, 1.0),
                            status: OperationStatus::Active,
                            reverses: None,
                            undone_at: None,
                        };
                        op.operation_id = self.append_record(&op)?;
                        warn!(
                            operation_id = op.operation_id,
                            path = %op.new_path.display(),
                            "Recovered move interrupted before logging"
                        );
                        self.publish(|ops| insert_sorted(ops, op));
                        recovered += 1;
                    } else {
                        debug!(path = %intent.from.display(), "Discarding incomplete move intent");
                    }
                }
                PendingKind::Undo { operation_id } => {
                    let op = self
                        .store
                        .with_conn(|conn| queries::get_operation(conn, *operation_id))?;

                    match op {
                        Some(op) if op.is_active() && completed => {
                            let (restore, undone_at) = self.append_undo(&op)?;
                            warn!(
                                operation_id = op.operation_id,
                                "Recovered undo interrupted before logging"
                            );
                            self.publish(|ops| {
                                if let Some(existing) =
                                    ops.iter_mut().find(|o| o.operation_id == op.operation_id)
                                {
                                    existing.status = OperationStatus::Undone;
                                    existing.undone_at = Some(undone_at);
                                }
                                insert_sorted(ops, restore);
                            });
                            recovered += 1;
                        }
                        _ => {
                            debug!(operation_id, "Discarding incomplete undo intent");
                        }
                    }
                }
            }
            self.journal.clear(intent.intent_id);
        }

        Ok(recovered)
    }
}

/// The file sits at the intent's destination with the recorded content and
/// no copy of it was left at the source. A different file at the source does
/// not count against the move.
fn move_completed(intent: &PendingMove) -> bool {
    if !intent.to.is_file() {
        return false;
    }
    if !matches!(fingerprint_file(&intent.to), Ok(fp) if fp == intent.fingerprint) {
        return false;
    }
    if !path_occupied(&intent.from) {
        return true;
    }
    matches!(fingerprint_file(&intent.from), Ok(fp) if fp != intent.fingerprint)
}

/// Log timestamps carry the precision the database stores
fn log_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn insert_sorted(ops: &mut Vec<Operation>, op: Operation) {
    let index = ops.partition_point(|existing| existing.operation_id < op.operation_id);
    ops.insert(index, op);
}

fn storage_failure(err: SentinelError, reverted: bool) -> SentinelError {
    let cause = match err {
        SentinelError::Storage(message) => message,
        other => other.to_string(),
    };
    if reverted {
        SentinelError::Storage(format!("Failed to append log entry: {}", cause))
    } else {
        SentinelError::Storage(format!(
            "Failed to append log entry and to move the file back, it will be logged on next open: {}",
            cause
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, RollbackLog) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("data/sentinel.db")).unwrap();
        let log = RollbackLog::open(store, dir.path().join("data/pending")).unwrap();
        (dir, log)
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_record_then_undo_restores_file() {
        let (dir, log) = setup();
        let src = write(dir.path(), "report.txt", "quarterly numbers");
        let before = fingerprint_file(&src).unwrap();
        let dest = dir.path().join("library/finance/report.txt");

        let id = log
            .record(OperationRequest::organize(src.clone(), dest.clone(), 0.9))
            .unwrap();
        assert!(!src.exists());
        assert!(dest.exists());
        assert!(log.get(id).unwrap().is_active());

        let outcome = log.undo(id).unwrap();
        assert_eq!(outcome.restored_path, src);
        assert_eq!(fingerprint_file(&src).unwrap(), before);
        assert!(!dest.exists());

        let undone = log.get(id).unwrap();
        assert_eq!(undone.status, OperationStatus::Undone);
        let restore = log.get(outcome.restore_id).unwrap();
        assert_eq!(restore.op_type, OperationType::Restore);
        assert_eq!(restore.status, OperationStatus::Inverse);
        assert_eq!(restore.reverses, Some(id));
    }

    #[test]
    fn test_second_undo_conflicts_without_touching_files() {
        let (dir, log) = setup();
        let src = write(dir.path(), "a.txt", "a");
        let dest = dir.path().join("out/a.txt");
        let id = log
            .record(OperationRequest::organize(src.clone(), dest.clone(), 1.0))
            .unwrap();
        log.undo(id).unwrap();

        let err = log.undo(id).unwrap_err();
        assert!(matches!(err, SentinelError::Conflict(_)));
        assert!(src.exists());
        assert!(!dest.exists());
        assert_eq!(log.operations().len(), 2);
    }

    #[test]
    fn test_undo_detects_modified_file() {
        let (dir, log) = setup();
        let src = write(dir.path(), "notes.txt", "original");
        let dest = dir.path().join("out/notes.txt");
        let id = log
            .record(OperationRequest::organize(src.clone(), dest.clone(), 1.0))
            .unwrap();

        fs::write(&dest, "tampered").unwrap();
        let err = log.undo(id).unwrap_err();
        assert!(matches!(err, SentinelError::Conflict(_)));
        assert!(dest.exists());
        assert!(log.get(id).unwrap().is_active());
        assert_eq!(log.verify().len(), 1);
    }

    #[test]
    fn test_undo_unknown_id() {
        let (_dir, log) = setup();
        assert!(matches!(log.undo(42), Err(SentinelError::NotFound(_))));
    }

    #[test]
    fn test_restore_entries_are_not_undoable() {
        let (dir, log) = setup();
        let src = write(dir.path(), "a.txt", "a");
        let id = log
            .record(OperationRequest::organize(src, dir.path().join("b/a.txt"), 1.0))
            .unwrap();
        let outcome = log.undo(id).unwrap();
        assert!(matches!(
            log.undo(outcome.restore_id),
            Err(SentinelError::Conflict(_))
        ));
    }

    #[test]
    fn test_record_refuses_collision() {
        let (dir, log) = setup();
        let src = write(dir.path(), "a.txt", "a");
        let dest = write(dir.path(), "b.txt", "b");

        let err = log
            .record(OperationRequest::rename(src.clone(), dest))
            .unwrap_err();
        assert!(matches!(err, SentinelError::Conflict(_)));
        assert!(src.exists());
        assert!(log.operations().is_empty());
    }

    #[test]
    fn test_record_missing_source() {
        let (dir, log) = setup();
        let err = log
            .record(OperationRequest::organize(
                dir.path().join("ghost.txt"),
                dir.path().join("out/ghost.txt"),
                1.0,
            ))
            .unwrap_err();
        assert!(matches!(err, SentinelError::NotFound(_)));
    }

    #[test]
    fn test_undo_all_since_is_independent_per_item() {
        let (dir, log) = setup();
        let start = Utc::now() - Duration::seconds(1);
        let mut ids = Vec::new();
        for i in 0..3 {
            let src = write(dir.path(), &format!("f{}.txt", i), &format!("content {}", i));
            ids.push(
                log.record(OperationRequest::organize(
                    src,
                    dir.path().join(format!("out/f{}.txt", i)),
                    1.0,
                ))
                .unwrap(),
            );
        }
        // Break the middle one out-of-band
        fs::remove_file(dir.path().join("out/f1.txt")).unwrap();

        let result = log.undo_all_since(start, None);
        assert_eq!(result.files_restored, 2);
        assert_eq!(result.failed_ids(), vec![ids[1]]);
        assert!(!result.cancelled);
        // Newest first
        assert_eq!(result.restored, vec![ids[2], ids[0]]);
    }

    #[test]
    fn test_undo_all_since_cancelled_reports_rest() {
        let (dir, log) = setup();
        let start = Utc::now() - Duration::seconds(1);
        for i in 0..2 {
            let src = write(dir.path(), &format!("f{}.txt", i), "x");
            log.record(OperationRequest::organize(
                src,
                dir.path().join(format!("out/f{}.txt", i)),
                1.0,
            ))
            .unwrap();
        }

        let cancel = AtomicBool::new(true);
        let result = log.undo_all_since(start, Some(&cancel));
        assert!(result.cancelled);
        assert_eq!(result.files_restored, 0);
        assert_eq!(result.not_attempted.len(), 2);
        assert_eq!(log.active_since(start).len(), 2);
    }

    #[test]
    fn test_log_survives_reopen() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("data/sentinel.db");
        let src = write(dir.path(), "a.txt", "a");
        let id = {
            let log = RollbackLog::open(Store::open(&db).unwrap(), dir.path().join("p")).unwrap();
            log.record(OperationRequest::organize(src, dir.path().join("o/a.txt"), 0.8))
                .unwrap()
        };

        let log = RollbackLog::open(Store::open(&db).unwrap(), dir.path().join("p")).unwrap();
        let op = log.get(id).unwrap();
        assert!(op.is_active());
        assert_eq!(op.confidence, 0.8);
    }

    #[test]
    fn test_recovery_appends_completed_move() {
        let dir = tempdir().unwrap();
        let pending_dir = dir.path().join("pending");
        let from = dir.path().join("a.txt");
        let to = write(dir.path(), "moved.txt", "payload");

        // Simulate a crash after the move but before the append
        let journal = PendingJournal::new(pending_dir.clone());
        journal
            .write(&PendingMove::new(
                PendingKind::Record {
                    request: OperationRequest::organize(from.clone(), to.clone(), 0.9),
                },
                from.clone(),
                to.clone(),
                fingerprint_file(&to).unwrap(),
                7,
            ))
            .unwrap();

        let log = RollbackLog::open(Store::open_in_memory().unwrap(), pending_dir).unwrap();
        let ops = log.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].original_path, from);
        assert!(journal.list().is_empty());
    }

    /// Make every insert of `op_type` into the operations table fail
    fn block_inserts(dir: &Path, op_type: &str) {
        let conn = rusqlite::Connection::open(dir.join("data/sentinel.db")).unwrap();
        conn.execute_batch(&format!(
            "CREATE TRIGGER block_{op_type} BEFORE INSERT ON operations
             WHEN NEW.op_type = '{op_type}'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;"
        ))
        .unwrap();
    }

    #[test]
    fn test_record_append_failure_moves_file_back() {
        let (dir, log) = setup();
        let src = write(dir.path(), "a.txt", "payload");
        let dest = dir.path().join("out/a.txt");
        block_inserts(dir.path(), "organize");

        let err = log
            .record(OperationRequest::organize(src.clone(), dest.clone(), 0.9))
            .unwrap_err();
        assert!(matches!(err, SentinelError::Storage(_)));
        assert!(src.is_file());
        assert!(!dest.exists());
        assert!(log.operations().is_empty());
        assert!(log.journal.list().is_empty());
    }

    #[test]
    fn test_undo_append_failure_keeps_operation_active() {
        let (dir, log) = setup();
        let src = write(dir.path(), "a.txt", "payload");
        let dest = dir.path().join("out/a.txt");
        let id = log
            .record(OperationRequest::organize(src.clone(), dest.clone(), 0.9))
            .unwrap();
        block_inserts(dir.path(), "restore");

        let err = log.undo(id).unwrap_err();
        assert!(matches!(err, SentinelError::Storage(_)));
        assert!(dest.is_file());
        assert!(!src.exists());
        assert!(log.get(id).unwrap().is_active());
        assert_eq!(log.operations().len(), 1);
        assert!(log.journal.list().is_empty());
    }

    #[test]
    fn test_failed_reversal_keeps_intent_for_recovery() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("data/sentinel.db");
        let pending_dir = dir.path().join("data/pending");
        let from = dir.path().join("a.txt");
        let to = write(dir.path(), "moved.txt", "payload");

        let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir.clone()).unwrap();
        let intent = PendingMove::new(
            PendingKind::Record {
                request: OperationRequest::organize(from.clone(), to.clone(), 0.9),
            },
            from.clone(),
            to.clone(),
            fingerprint_file(&to).unwrap(),
            7,
        );
        log.journal.write(&intent).unwrap();
        // Something else took the original name, so the file cannot go back
        fs::write(&from, "someone else's file").unwrap();

        assert!(!log.move_back(&to, &from, &intent));
        assert!(to.is_file());
        assert_eq!(log.journal.list().len(), 1);
        drop(log);

        let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir).unwrap();
        let ops = log.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].original_path, from);
        assert_eq!(ops[0].new_path, to);
        assert!(ops[0].is_active());
        assert!(log.journal.list().is_empty());
    }

    #[test]
    fn test_recovery_completes_interrupted_undo() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("data/sentinel.db");
        let pending_dir = dir.path().join("data/pending");
        let src = write(dir.path(), "a.txt", "payload");
        let dest = dir.path().join("out/a.txt");

        let id = {
            let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir.clone()).unwrap();
            let id = log
                .record(OperationRequest::organize(src.clone(), dest.clone(), 0.9))
                .unwrap();
            let op = log.get(id).unwrap();

            // Crash after the undo move, before its entry was appended
            log.journal
                .write(&PendingMove::new(
                    PendingKind::Undo { operation_id: id },
                    dest.clone(),
                    src.clone(),
                    op.fingerprint.clone(),
                    op.size,
                ))
                .unwrap();
            fs::rename(&dest, &src).unwrap();
            id
        };

        let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir).unwrap();
        assert_eq!(log.get(id).unwrap().status, OperationStatus::Undone);
        let restore = log
            .operations()
            .into_iter()
            .find(|op| op.reverses == Some(id))
            .unwrap();
        assert_eq!(restore.status, OperationStatus::Inverse);
        assert_eq!(restore.new_path, src);
        assert!(log.journal.list().is_empty());
    }

    #[test]
    fn test_recovery_ignores_undo_that_never_moved() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("data/sentinel.db");
        let pending_dir = dir.path().join("data/pending");
        let src = write(dir.path(), "a.txt", "payload");
        let dest = dir.path().join("out/a.txt");

        let id = {
            let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir.clone()).unwrap();
            let id = log
                .record(OperationRequest::organize(src.clone(), dest.clone(), 0.9))
                .unwrap();
            let op = log.get(id).unwrap();
            log.journal
                .write(&PendingMove::new(
                    PendingKind::Undo { operation_id: id },
                    dest.clone(),
                    src.clone(),
                    op.fingerprint,
                    op.size,
                ))
                .unwrap();
            id
        };

        let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir).unwrap();
        assert!(log.get(id).unwrap().is_active());
        assert_eq!(log.operations().len(), 1);
        assert!(log.journal.list().is_empty());
    }

    #[test]
    fn test_timestamps_match_after_reopen() {
        use chrono::Timelike;

        let dir = tempdir().unwrap();
        let db = dir.path().join("data/sentinel.db");
        let pending_dir = dir.path().join("data/pending");
        let src = write(dir.path(), "a.txt", "payload");

        let before = {
            let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir.clone()).unwrap();
            log.record(OperationRequest::organize(src, dir.path().join("out/a.txt"), 0.9))
                .unwrap();
            log.operations()[0].timestamp
        };
        assert_eq!(before.timestamp_subsec_nanos() % 1_000_000, 0);

        let log = RollbackLog::open(Store::open(&db).unwrap(), pending_dir).unwrap();
        assert_eq!(log.operations()[0].timestamp, before);
        assert_eq!(log.active_since(before).len(), 1);
    }

    #[test]
    fn test_recovery_discards_move_that_never_happened() {
        let dir = tempdir().unwrap();
        let pending_dir = dir.path().join("pending");
        let from = write(dir.path(), "a.txt", "payload");
        let to = dir.path().join("out/a.txt");

        let journal = PendingJournal::new(pending_dir.clone());
        journal
            .write(&PendingMove::new(
                PendingKind::Record {
                    request: OperationRequest::organize(from.clone(), to.clone(), 0.9),
                },
                from.clone(),
                to,
                fingerprint_file(&from).unwrap(),
                7,
            ))
            .unwrap();

        let log = RollbackLog::open(Store::open_in_memory().unwrap(), pending_dir).unwrap();
        assert!(log.operations().is_empty());
        assert!(journal.list().is_empty());
    }
}
