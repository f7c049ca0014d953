use crate::error::{Result, SentinelError};
use crate::fingerprint::fingerprint_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Lifecycle of a file known to the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Observed,
    PendingReview,
    Organized,
    /// Tombstone: the file was moved to the recycle location by dedup cleanup
    DuplicateRemoved,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observed => "observed",
            Self::PendingReview => "pending_review",
            Self::Organized => "organized",
            Self::DuplicateRemoved => "duplicate_removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observed" => Some(Self::Observed),
            "pending_review" => Some(Self::PendingReview),
            "organized" => Some(Self::Organized),
            "duplicate_removed" => Some(Self::DuplicateRemoved),
            _ => None,
        }
    }
}

/// A single file as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Absolute path
    pub path: PathBuf,
    /// Hex SHA-256 of the contents
    pub fingerprint: String,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
    pub status: FileStatus,
}

impl FileDescriptor {
    /// Build a descriptor by reading metadata and hashing the file
    ///
    /// Fails with `Validation` for relative paths, directories, symlinks and
    /// unreadable files, and with `NotFound` when nothing exists at `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(SentinelError::Validation(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        let metadata = std::fs::symlink_metadata(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SentinelError::NotFound(path.display().to_string()),
            _ => SentinelError::Validation(format!("Cannot stat {}: {}", path.display(), e)),
        })?;

        if metadata.is_symlink() {
            return Err(SentinelError::Validation(format!(
                "Refusing to classify symlink: {}",
                path.display()
            )));
        }
        if !metadata.is_file() {
            return Err(SentinelError::Validation(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            path: path.to_path_buf(),
            fingerprint: fingerprint_file(path)?,
            size: metadata.len(),
            modified_at,
            status: FileStatus::Observed,
        })
    }

    /// File name including extension
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// File name without extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Lowercased extension without the dot
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// MIME type guess based on extension
    pub fn mime_type(&self) -> Option<String> {
        self.extension()
            .and_then(|ext| mime_guess::from_ext(&ext).first().map(|m| m.to_string()))
    }
}
