//! Rollback log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of filesystem action recorded in the log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Move into the category taxonomy
    Organize,
    /// Rename within the same directory
    Rename,
    /// Move a duplicate into the recycle location
    DedupRemove,
    /// Inverse move appended when an operation is undone
    Restore,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organize => "organize",
            Self::Rename => "rename",
            Self::DedupRemove => "dedup_remove",
            Self::Restore => "restore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organize" => Some(Self::Organize),
            "rename" => Some(Self::Rename),
            "dedup_remove" => Some(Self::DedupRemove),
            "restore" => Some(Self::Restore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// In effect: the file lives at `new_path` with the recorded fingerprint
    Active,
    /// Reverted. Immutable history.
    Undone,
    /// A `restore` entry. History only, never undoable.
    Inverse,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Undone => "undone",
            Self::Inverse => "inverse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "undone" => Some(Self::Undone),
            "inverse" => Some(Self::Inverse),
            _ => None,
        }
    }
}

/// One reversible filesystem action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Monotonic, assigned by the log
    pub operation_id: u64,
    pub op_type: OperationType,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    /// Fingerprint of the moved file at record time
    pub fingerprint: String,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub status: OperationStatus,
    /// For `restore` entries, the operation that was undone
    pub reverses: Option<u64>,
    pub undone_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn is_active(&self) -> bool {
        self.status == OperationStatus::Active
    }

    pub fn description(&self) -> String {
        format!(
            "#{} {} {} -> {}",
            self.operation_id,
            self.op_type.as_str(),
            self.original_path.display(),
            self.new_path.display()
        )
    }
}

/// What a caller asks the log to perform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub op_type: OperationType,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    pub confidence: f64,
}

impl OperationRequest {
    pub fn organize(original: PathBuf, destination: PathBuf, confidence: f64) -> Self {
        Self {
            op_type: OperationType::Organize,
            original_path: original,
            new_path: destination,
            confidence,
        }
    }

    pub fn rename(original: PathBuf, renamed: PathBuf) -> Self {
        Self {
            op_type: OperationType::Rename,
            original_path: original,
            new_path: renamed,
            confidence: 1.0,
        }
    }

    pub fn dedup_remove(original: PathBuf, recycle_path: PathBuf) -> Self {
        Self {
            op_type: OperationType::DedupRemove,
            original_path: original,
            new_path: recycle_path,
            confidence: 1.0,
        }
    }
}

/// Outcome of a single successful undo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub operation_id: u64,
    /// Id of the appended `restore` entry
    pub restore_id: u64,
    pub restored_path: PathBuf,
}

/// One failed item of a bulk undo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UndoFailure {
    pub operation_id: u64,
    pub reason: String,
}

/// Per-item report of `undo_all_since`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkUndoResult {
    pub files_restored: usize,
    pub restored: Vec<u64>,
    pub failed: Vec<UndoFailure>,
    /// Ids never attempted because the batch was cancelled
    pub not_attempted: Vec<u64>,
    pub cancelled: bool,
}

impl BulkUndoResult {
    pub fn failed_ids(&self) -> Vec<u64> {
        self.failed.iter().map(|f| f.operation_id).collect()
    }

    pub fn success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}
