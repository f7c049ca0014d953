use std::path::{Path, PathBuf};

use crate::error::{Result, SentinelError};
use crate::rollback::io::is_symlink;

/// Security validator for path operations
pub struct PathValidator;

impl PathValidator {
    /// Check if a path is protected and should not be modified
    pub fn is_protected_path(path: &Path) -> bool {
        let protected_paths: Vec<PathBuf> = vec![
            PathBuf::from("/"),
            PathBuf::from("/System"),
            PathBuf::from("/usr"),
            PathBuf::from("/bin"),
            PathBuf::from("/sbin"),
            PathBuf::from("/etc"),
            PathBuf::from("/Library"),
            PathBuf::from("/Applications"),
            PathBuf::from("/private"),
            PathBuf::from("/var"),
            // Windows system paths
            PathBuf::from("C:\\Windows"),
            PathBuf::from("C:\\Program Files"),
            PathBuf::from("C:\\Program Files (x86)"),
        ];

        // Get canonical path if possible
        let check_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        for protected in &protected_paths {
            if check_path == *protected {
                return true;
            }
            if check_path.starts_with(protected) {
                // Allow user directories within home
                if let Some(home) = dirs::home_dir() {
                    if check_path.starts_with(&home) {
                        return false;
                    }
                }
                // Block direct children of a protected root
                if check_path.parent() == Some(protected.as_path()) {
                    return true;
                }
            }
        }

        // Block home directory itself (but not subdirectories)
        if let Some(home) = dirs::home_dir() {
            if check_path == home {
                return true;
            }
        }

        false
    }

    /// Validate both ends of a move before touching the filesystem
    pub fn validate_move(source: &Path, destination: &Path) -> Result<()> {
        for path in [source, destination] {
            if !path.is_absolute() {
                return Err(SentinelError::Validation(format!(
                    "Path must be absolute: {}",
                    path.display()
                )));
            }
        }

        if source == destination {
            return Err(SentinelError::Validation(format!(
                "Source and destination are the same: {}",
                source.display()
            )));
        }

        if Self::is_protected_path(source) {
            return Err(SentinelError::Validation(format!(
                "Cannot move protected path: {}",
                source.display()
            )));
        }

        let landing = destination.parent().unwrap_or(destination);
        if Self::is_protected_path(destination) || Self::is_protected_path(landing) {
            return Err(SentinelError::Validation(format!(
                "Cannot move into protected path: {}",
                destination.display()
            )));
        }

        if is_symlink(source) {
            return Err(SentinelError::Validation(format!(
                "Refusing to move symlink: {}",
                source.display()
            )));
        }

        if destination.starts_with(source) {
            return Err(SentinelError::Validation(format!(
                "Cannot move {} into itself",
                source.display()
            )));
        }

        Ok(())
    }
}
