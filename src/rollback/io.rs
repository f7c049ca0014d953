//! Safe I/O utilities for the rollback log
//!
//! Provides crash-safe file operations including:
//! - Atomic writes with fsync
//! - Directory synchronization
//! - Symlink detection
//! - Moves that fall back to copy + fsync + remove across devices
//!
//! These utilities ensure data integrity even in the event of system crashes
//! or power failures.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::SentinelError;

/// Error type for safe I/O operations
#[derive(Debug, Clone)]
pub struct SafeIoError {
    pub message: String,
    pub kind: SafeIoErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeIoErrorKind {
    WriteError,
    SyncError,
    RenameError,
    PathError,
    SymlinkError,
    /// Something already exists at the destination
    Collision,
    /// The source does not exist
    Missing,
}

impl std::fmt::Display for SafeIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SafeIoError {}

impl From<SafeIoError> for SentinelError {
    fn from(err: SafeIoError) -> Self {
        match err.kind {
            SafeIoErrorKind::Collision => SentinelError::Conflict(err.message),
            SafeIoErrorKind::Missing => SentinelError::NotFound(err.message),
            SafeIoErrorKind::SymlinkError | SafeIoErrorKind::PathError => {
                SentinelError::Validation(err.message)
            }
            _ => SentinelError::Io(err.message),
        }
    }
}

/// Write data to a file atomically with fsync
///
/// This function:
/// 1. Writes data to a temporary file in the same directory
/// 2. Calls fsync on the file to ensure data is on disk
/// 3. Atomically renames the temp file to the target
/// 4. Syncs the directory to ensure the rename is durable
///
/// If any step fails, the temporary file is cleaned up.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SafeIoError> {
    let parent = path.parent().ok_or_else(|| SafeIoError {
        message: format!("Cannot determine parent directory for: {}", path.display()),
        kind: SafeIoErrorKind::PathError,
    })?;

    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| SafeIoError {
            message: format!("Failed to create directory {}: {}", parent.display(), e),
            kind: SafeIoErrorKind::WriteError,
        })?;
    }

    let temp_path = temp_sibling(path);

    let write_result = (|| -> Result<(), SafeIoError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| SafeIoError {
                message: format!("Failed to create temp file {}: {}", temp_path.display(), e),
                kind: SafeIoErrorKind::WriteError,
            })?;

        file.write_all(data).map_err(|e| SafeIoError {
            message: format!("Failed to write to temp file: {}", e),
            kind: SafeIoErrorKind::WriteError,
        })?;

        file.sync_all().map_err(|e| SafeIoError {
            message: format!("Failed to sync temp file: {}", e),
            kind: SafeIoErrorKind::SyncError,
        })?;

        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(SafeIoError {
            message: format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ),
            kind: SafeIoErrorKind::RenameError,
        });
    }

    sync_directory(parent)
}

/// Sync a directory to ensure metadata changes are durable
///
/// On Unix this opens the directory and calls fsync, which persists renames.
/// On Windows it is a no-op: NTFS renames are already atomic.
pub fn sync_directory(path: &Path) -> Result<(), SafeIoError> {
    #[cfg(unix)]
    {
        let dir = File::open(path).map_err(|e| SafeIoError {
            message: format!("Failed to open directory {}: {}", path.display(), e),
            kind: SafeIoErrorKind::SyncError,
        })?;

        dir.sync_all().map_err(|e| SafeIoError {
            message: format!("Failed to sync directory {}: {}", path.display(), e),
            kind: SafeIoErrorKind::SyncError,
        })?;
    }

    #[cfg(windows)]
    {
        let _ = path;
    }

    Ok(())
}

/// Check if a path is a symlink without following it
pub fn is_symlink(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) => meta.is_symlink(),
        Err(_) => false,
    }
}

/// Whether anything (file, directory or dangling symlink) exists at `path`
pub fn path_occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Ensure a path is not a symlink before operating on it
pub fn ensure_not_symlink(path: &Path, operation: &str) -> Result<(), SafeIoError> {
    if is_symlink(path) {
        return Err(SafeIoError {
            message: format!("Refusing to {} symlink: {}", operation, path.display()),
            kind: SafeIoErrorKind::SymlinkError,
        });
    }
    Ok(())
}

/// Move a regular file, never overwriting the destination
///
/// Tries a rename first. When that fails (typically across filesystems) the
/// file is copied to a temp sibling of the destination, fsynced, given the
/// source's modification time, renamed into place, and only then is the
/// source removed. Both parent directories are synced afterwards.
pub fn move_file(source: &Path, destination: &Path) -> Result<(), SafeIoError> {
    ensure_not_symlink(source, "move")?;

    if !source.is_file() {
        return Err(SafeIoError {
            message: format!("Source not found: {}", source.display()),
            kind: SafeIoErrorKind::Missing,
        });
    }

    if path_occupied(destination) {
        return Err(SafeIoError {
            message: format!("Destination already exists: {}", destination.display()),
            kind: SafeIoErrorKind::Collision,
        });
    }

    let dest_parent = destination.parent().ok_or_else(|| SafeIoError {
        message: format!("Cannot determine parent of {}", destination.display()),
        kind: SafeIoErrorKind::PathError,
    })?;

    if !dest_parent.exists() {
        fs::create_dir_all(dest_parent).map_err(|e| SafeIoError {
            message: format!("Failed to create destination directory: {}", e),
            kind: SafeIoErrorKind::WriteError,
        })?;
    }

    if let Err(rename_err) = fs::rename(source, destination) {
        tracing::debug!(
            source = %source.display(),
            error = %rename_err,
            "Rename failed, falling back to copy"
        );
        copy_then_remove(source, destination)?;
    }

    sync_directory(dest_parent)?;
    if let Some(src_parent) = source.parent() {
        // The source directory may have been removed by someone else
        if src_parent.exists() {
            sync_directory(src_parent)?;
        }
    }

    Ok(())
}

fn copy_then_remove(source: &Path, destination: &Path) -> Result<(), SafeIoError> {
    let temp_path = temp_sibling(destination);

    let copy_result = (|| -> io::Result<()> {
        fs::copy(source, &temp_path)?;
        File::open(&temp_path)?.sync_all()?;
        let meta = fs::metadata(source)?;
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        filetime::set_file_mtime(&temp_path, mtime)?;
        fs::rename(&temp_path, destination)
    })();

    if let Err(e) = copy_result {
        let _ = fs::remove_file(&temp_path);
        return Err(SafeIoError {
            message: format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                destination.display(),
                e
            ),
            kind: SafeIoErrorKind::WriteError,
        });
    }

    if let Err(e) = fs::remove_file(source) {
        // Leave exactly one copy behind
        let _ = fs::remove_file(destination);
        return Err(SafeIoError {
            message: format!("Failed to remove source {}: {}", source.display(), e),
            kind: SafeIoErrorKind::WriteError,
        });
    }

    Ok(())
}

/// First free path of the form `name`, `name (1)`, `name (2)` ... in `dir`
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !path_occupied(&candidate) {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
        if !path_occupied(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        std::process::id()
    );
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"Hello, World!").unwrap();

        assert!(path.exists());
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Hello, World!");
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("test.txt");

        atomic_write(&path, b"nested").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_is_symlink() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "content").unwrap();

        assert!(!is_symlink(&file));

        #[cfg(unix)]
        {
            let link = dir.path().join("link.txt");
            std::os::unix::fs::symlink(&file, &link).unwrap();
            assert!(is_symlink(&link));
            assert!(ensure_not_symlink(&link, "test").is_err());
        }
    }

    #[test]
    fn test_move_file_creates_parents() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let dest = dir.path().join("a").join("b").join("dest.txt");
        fs::write(&source, "test content").unwrap();

        move_file(&source, &dest).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "test content");
    }

    #[test]
    fn test_move_file_never_overwrites() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let dest = dir.path().join("dest.txt");
        fs::write(&source, "new").unwrap();
        fs::write(&dest, "old").unwrap();

        let err = move_file(&source, &dest).unwrap_err();
        assert_eq!(err.kind, SafeIoErrorKind::Collision);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "old");
        assert!(source.exists());
    }

    #[test]
    fn test_move_missing_source() {
        let dir = tempdir().unwrap();
        let err = move_file(&dir.path().join("nope"), &dir.path().join("x")).unwrap_err();
        assert!(matches!(SentinelError::from(err), SentinelError::NotFound(_)));
    }

    #[test]
    fn test_copy_fallback_preserves_mtime() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let dest = dir.path().join("dest.txt");
        fs::write(&source, "payload").unwrap();
        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, old).unwrap();

        copy_then_remove(&source, &dest).unwrap();

        assert!(!source.exists());
        let meta = fs::metadata(&dest).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_unique_destination() {
        let dir = tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.pdf"), dir.path().join("a.pdf"));

        fs::write(dir.path().join("a.pdf"), "1").unwrap();
        fs::write(dir.path().join("a (1).pdf"), "2").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.pdf"),
            dir.path().join("a (2).pdf")
        );
    }
}
