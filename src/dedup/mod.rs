//! Content-addressed deduplication
//!
//! `scan` groups files by size first and only fingerprints files that share a
//! size. `clean` never deletes: every non-kept member is moved into the
//! recycle directory through the rollback log, so cleanup can be undone like
//! any other operation.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SentinelError};
use crate::fingerprint::fingerprint_file;
use crate::models::{FileDescriptor, FileStatus, OperationRequest};
use crate::rollback::io::unique_destination;
use crate::rollback::RollbackLog;
use crate::storage::{queries, Store};

/// Files sharing one fingerprint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub fingerprint: String,
    /// Sorted by path
    pub members: Vec<FileDescriptor>,
    /// Sum of all member sizes
    pub total_size: u64,
}

impl DuplicateGroup {
    /// Bytes freed by keeping exactly one member
    pub fn reclaimable(&self) -> u64 {
        let one = self.members.first().map(|m| m.size).unwrap_or(0);
        self.total_size.saturating_sub(one)
    }
}

/// Where to look for duplicates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanScope {
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub include_hidden: bool,
    /// Smaller files are ignored. Empty files are never duplicates.
    #[serde(default = "default_min_size")]
    pub min_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_size() -> u64 {
    1
}

impl ScanScope {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            recursive: true,
            include_hidden: false,
            min_size: default_min_size(),
        }
    }

    pub fn single(root: impl Into<PathBuf>) -> Self {
        Self::new(vec![root.into()])
    }
}

/// Outcome of cleaning one group
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanResult {
    pub kept: PathBuf,
    /// `(original path, operation id)` for every member moved to the recycle directory
    pub removed: Vec<(PathBuf, u64)>,
    /// `(path, reason)` for members left in place
    pub failed: Vec<(PathBuf, String)>,
    pub bytes_reclaimed: u64,
}

pub struct Deduplicator {
    log: Arc<RollbackLog>,
    store: Store,
    recycle_dir: PathBuf,
}

impl Deduplicator {
    pub fn new(log: Arc<RollbackLog>, store: Store, recycle_dir: PathBuf) -> Self {
        Self {
            log,
            store,
            recycle_dir,
        }
    }

    pub fn recycle_dir(&self) -> &Path {
        &self.recycle_dir
    }

    /// Every group of two or more files with identical contents under `scope`
    ///
    /// Groups are sorted by reclaimable bytes, largest first. Scanned files are
    /// added to the file registry.
    pub fn scan(&self, scope: &ScanScope) -> Result<Vec<DuplicateGroup>> {
        let mut by_size: HashMap<u64, Vec<PathBuf>> = HashMap::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut scanned = 0usize;

        for root in &scope.roots {
            if !root.is_dir() {
                return Err(SentinelError::NotFound(format!(
                    "Scan root not found: {}",
                    root.display()
                )));
            }

            let walker = WalkDir::new(root)
                .follow_links(false)
                .max_depth(if scope.recursive { usize::MAX } else { 1 });

            for entry in walker
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || scope.include_hidden || !is_hidden(e.path()))
            {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable entry during scan");
                        continue;
                    }
                };
                if !entry.file_type().is_file() || entry.path().starts_with(&self.recycle_dir) {
                    continue;
                }
                let size = match entry.metadata() {
                    Ok(meta) => meta.len(),
                    Err(_) => continue,
                };
                if size < scope.min_size.max(1) {
                    continue;
                }
                if seen.insert(entry.path().to_path_buf()) {
                    by_size.entry(size).or_default().push(entry.into_path());
                    scanned += 1;
                }
            }
        }

        let mut groups = Vec::new();
        let mut candidates = 0usize;
        for (_, paths) in by_size.into_iter().filter(|(_, paths)| paths.len() > 1) {
            let mut by_fingerprint: HashMap<String, Vec<FileDescriptor>> = HashMap::new();
            for path in paths {
                candidates += 1;
                match FileDescriptor::from_path(&path) {
                    Ok(file) => by_fingerprint
                        .entry(file.fingerprint.clone())
                        .or_default()
                        .push(file),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping file during scan"),
                }
            }

            for (fingerprint, mut members) in by_fingerprint {
                if members.len() < 2 {
                    continue;
                }
                members.sort_by(|a, b| a.path.cmp(&b.path));
                let total_size = members.iter().map(|m| m.size).sum();
                groups.push(DuplicateGroup {
                    fingerprint,
                    members,
                    total_size,
                });
            }
        }

        self.store.transaction(|tx| {
            for member in groups.iter().flat_map(|g| g.members.iter()) {
                queries::register_file(tx, member)?;
            }
            Ok(())
        })?;

        groups.sort_by(|a, b| {
            b.reclaimable()
                .cmp(&a.reclaimable())
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        let reclaimable: u64 = groups.iter().map(|g| g.reclaimable()).sum();
        info!(
            files = scanned,
            hashed = candidates,
            groups = groups.len(),
            reclaimable = %human_bytes(reclaimable),
            "Duplicate scan finished"
        );
        Ok(groups)
    }

    /// Keep `members[keep_index]`, move every other member to the recycle
    /// directory through the rollback log
    ///
    /// The kept member is verified before anything moves, so a group always
    /// keeps at least one copy. Members that changed since the scan are left
    /// in place and reported.
    pub fn clean(&self, group: &DuplicateGroup, keep_index: usize) -> Result<CleanResult> {
        if group.members.len() < 2 {
            return Err(SentinelError::Conflict(format!(
                "Group {} has a single member, nothing to deduplicate",
                short(&group.fingerprint)
            )));
        }
        let kept = group.members.get(keep_index).ok_or_else(|| {
            SentinelError::Validation(format!(
                "keep_index {} out of range for a group of {}",
                keep_index,
                group.members.len()
            ))
        })?;

        match fingerprint_file(&kept.path) {
            Ok(fp) if fp == group.fingerprint => {}
            Ok(_) => {
                return Err(SentinelError::Conflict(format!(
                    "Kept file changed since the scan: {}",
                    kept.path.display()
                )))
            }
            Err(e) => {
                return Err(SentinelError::Conflict(format!(
                    "Kept file is no longer available: {}",
                    e
                )))
            }
        }

        let bucket = self.recycle_dir.join(short(&group.fingerprint));
        let mut result = CleanResult {
            kept: kept.path.clone(),
            ..Default::default()
        };

        for (index, member) in group.members.iter().enumerate() {
            if index == keep_index || member.path == kept.path {
                continue;
            }

            match fingerprint_file(&member.path) {
                Ok(fp) if fp == group.fingerprint => {}
                Ok(_) => {
                    result
                        .failed
                        .push((member.path.clone(), "changed since the scan".to_string()));
                    continue;
                }
                Err(e) => {
                    result.failed.push((member.path.clone(), e.to_string()));
                    continue;
                }
            }

            let destination = unique_destination(&bucket, &member.file_name());
            match self
                .log
                .record(OperationRequest::dedup_remove(member.path.clone(), destination))
            {
                Ok(id) => {
                    debug!(operation_id = id, path = %member.path.display(), "Duplicate recycled");
                    result.removed.push((member.path.clone(), id));
                    result.bytes_reclaimed += member.size;
                }
                Err(e @ SentinelError::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!(path = %member.path.display(), error = %e, "Failed to recycle duplicate");
                    result.failed.push((member.path.clone(), e.to_string()));
                }
            }
        }

        info!(
            kept = %result.kept.display(),
            removed = result.removed.len(),
            failed = result.failed.len(),
            reclaimed = %human_bytes(result.bytes_reclaimed),
            "Duplicate group cleaned"
        );
        Ok(result)
    }

    /// Registry tombstones left by earlier cleanups
    pub fn removed_files(&self) -> Result<Vec<FileDescriptor>> {
        self.store
            .with_conn(|conn| queries::files_by_status(conn, FileStatus::DuplicateRemoved))
    }
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(16)]
}

/// Human-readable byte count for log lines, e.g. "3.4 MiB"
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationType;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    fn setup() -> (TempDir, Deduplicator, Arc<RollbackLog>) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("data/sentinel.db")).unwrap();
        let log = Arc::new(RollbackLog::open(store.clone(), dir.path().join("data/pending")).unwrap());
        let dedup = Deduplicator::new(Arc::clone(&log), store, dir.path().join("data/recycle"));
        fs::create_dir_all(dir.path().join("files/nested")).unwrap();
        (dir, dedup, log)
    }

    #[test]
    fn test_scan_groups_identical_files() {
        let (dir, dedup, _log) = setup();
        let files = dir.path().join("files");
        fs::write(files.join("a.txt"), "same contents").unwrap();
        fs::write(files.join("b.txt"), "same contents").unwrap();
        fs::write(files.join("nested/c.txt"), "same contents").unwrap();
        // Same size, different bytes
        fs::write(files.join("d.txt"), "SAME CONTENTS").unwrap();
        fs::write(files.join("empty1.txt"), "").unwrap();
        fs::write(files.join("empty2.txt"), "").unwrap();

        let groups = dedup.scan(&ScanScope::single(&files)).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
        assert_eq!(groups[0].total_size, 3 * "same contents".len() as u64);
        assert_eq!(groups[0].reclaimable(), 2 * "same contents".len() as u64);
    }

    #[test]
    fn test_non_recursive_scan() {
        let (dir, dedup, _log) = setup();
        let files = dir.path().join("files");
        fs::write(files.join("a.txt"), "x").unwrap();
        fs::write(files.join("nested/b.txt"), "x").unwrap();

        let mut scope = ScanScope::single(&files);
        scope.recursive = false;
        assert!(dedup.scan(&scope).unwrap().is_empty());
    }

    #[test]
    fn test_clean_keeps_exactly_one() {
        let (dir, dedup, log) = setup();
        let files = dir.path().join("files");
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(files.join(name), "dup").unwrap();
        }
        let group = dedup.scan(&ScanScope::single(&files)).unwrap().remove(0);

        let result = dedup.clean(&group, 1).unwrap();
        assert_eq!(result.kept, files.join("b.txt"));
        assert_eq!(result.removed.len(), 2);
        assert!(files.join("b.txt").exists());
        assert!(!files.join("a.txt").exists());
        assert!(!files.join("c.txt").exists());

        let ops = log.operations();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.op_type == OperationType::DedupRemove));
        assert!(ops.iter().all(|op| op.new_path.starts_with(dedup.recycle_dir())));
        assert_eq!(dedup.removed_files().unwrap().len(), 2);
    }

    #[test]
    fn test_clean_rejects_bad_input() {
        let (dir, dedup, _log) = setup();
        let path = dir.path().join("files/only.txt");
        fs::write(&path, "solo").unwrap();
        let single = DuplicateGroup {
            fingerprint: fingerprint_file(&path).unwrap(),
            members: vec![FileDescriptor::from_path(&path).unwrap()],
            total_size: 4,
        };
        assert!(matches!(dedup.clean(&single, 0), Err(SentinelError::Conflict(_))));

        let other = dir.path().join("files/other.txt");
        fs::write(&other, "solo").unwrap();
        let pair = DuplicateGroup {
            members: vec![
                FileDescriptor::from_path(&path).unwrap(),
                FileDescriptor::from_path(&other).unwrap(),
            ],
            total_size: 8,
            ..single
        };
        assert!(matches!(dedup.clean(&pair, 2), Err(SentinelError::Validation(_))));
        assert!(path.exists() && other.exists());
    }

    #[test]
    fn test_clean_refuses_when_kept_file_changed() {
        let (dir, dedup, log) = setup();
        let files = dir.path().join("files");
        fs::write(files.join("a.txt"), "dup").unwrap();
        fs::write(files.join("b.txt"), "dup").unwrap();
        let group = dedup.scan(&ScanScope::single(&files)).unwrap().remove(0);

        fs::write(files.join("a.txt"), "changed").unwrap();
        assert!(matches!(dedup.clean(&group, 0), Err(SentinelError::Conflict(_))));
        assert!(files.join("b.txt").exists());
        assert!(log.operations().is_empty());
    }

    #[test]
    fn test_clean_is_undoable() {
        let (dir, dedup, log) = setup();
        let files = dir.path().join("files");
        fs::write(files.join("a.txt"), "dup").unwrap();
        fs::write(files.join("b.txt"), "dup").unwrap();
        let group = dedup.scan(&ScanScope::single(&files)).unwrap().remove(0);

        let result = dedup.clean(&group, 0).unwrap();
        let (path, id) = result.removed[0].clone();
        log.undo(id).unwrap();
        assert!(path.exists());
    }
}
