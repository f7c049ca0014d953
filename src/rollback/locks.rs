//! Per-path locks
//!
//! Operations on the same file are totally ordered; operations on different
//! files proceed in parallel. A caller acquires every path it will touch in one
//! call, so two movers can never hold half of each other's paths.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until none of `paths` is held, then take all of them
    pub fn acquire(&self, paths: &[&Path]) -> PathGuard<'_> {
        let wanted: Vec<PathBuf> = paths.iter().map(|p| p.to_path_buf()).collect();

        // A panicked holder still releases its paths in Drop, so poison is safe to ignore
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while wanted.iter().any(|p| held.contains(p)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        for path in &wanted {
            held.insert(path.clone());
        }

        PathGuard {
            locks: self,
            paths: wanted,
        }
    }

    pub fn is_held(&self, path: &Path) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(path))
            .unwrap_or(false)
    }
}

/// Releases its paths on drop
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    paths: Vec<PathBuf>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|e| e.into_inner());
        for path in &self.paths {
            held.remove(path);
        }
        self.locks.released.notify_all();
    }
}
