//! In-flight move intents
//!
//! Before the log moves a file it writes a small intent record next to the
//! database. The intent is removed once the log entry is committed. If the
//! process dies in between, recovery inspects the filesystem: a move that
//! demonstrably completed gets its log entry, anything else is discarded. A log
//! entry is never produced for a move that did not happen.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::io::atomic_write;
use crate::error::Result;
use crate::models::OperationRequest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PendingKind {
    /// A new operation being recorded
    Record { request: OperationRequest },
    /// An active operation being undone
    Undo { operation_id: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingMove {
    pub intent_id: Uuid,
    pub kind: PendingKind,
    /// Where the file is before the move
    pub from: PathBuf,
    /// Where the file will be after the move
    pub to: PathBuf,
    pub fingerprint: String,
    pub size: u64,
    pub started_at: DateTime<Utc>,
}

impl PendingMove {
    pub fn new(kind: PendingKind, from: PathBuf, to: PathBuf, fingerprint: String, size: u64) -> Self {
        Self {
            intent_id: Uuid::new_v4(),
            kind,
            from,
            to,
            fingerprint,
            size,
            started_at: Utc::now().trunc_subsecs(3),
        }
    }
}

/// Directory of intent files, one per in-flight move
pub struct PendingJournal {
    dir: PathBuf,
}

impl PendingJournal {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_for(&self, intent_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", intent_id))
    }

    pub fn write(&self, pending: &PendingMove) -> Result<()> {
        let data = serde_json::to_vec_pretty(pending)?;
        atomic_write(&self.file_for(pending.intent_id), &data)?;
        Ok(())
    }

    pub fn clear(&self, intent_id: Uuid) {
        let path = self.file_for(intent_id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove move intent");
            }
        }
    }

    /// Every intent left behind by a previous run. Unreadable files are skipped
    /// and reported.
    pub fn list(&self) -> Vec<PendingMove> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut pending = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice::<PendingMove>(&bytes).map_err(|e| e.to_string()))
            {
                Ok(p) => pending.push(p),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable move intent");
                }
            }
        }
        pending.sort_by_key(|p| p.started_at);
        pending
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_list_clear() {
        let dir = tempdir().unwrap();
        let journal = PendingJournal::new(dir.path().join("pending"));
        let pending = PendingMove::new(
            PendingKind::Undo { operation_id: 7 },
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            "fp".to_string(),
            3,
        );

        journal.write(&pending).unwrap();
        assert_eq!(journal.list(), vec![pending.clone()]);

        journal.clear(pending.intent_id);
        assert!(journal.list().is_empty());
    }

    #[test]
    fn test_list_skips_garbage() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let journal = PendingJournal::new(dir.path().to_path_buf());
        assert!(journal.list().is_empty());
    }
}
