//! Change sources for the observer
//!
//! The monitor does not care where events come from. `NotifyBackend` uses OS
//! notifications through a debouncer; `PollingBackend` asks for a full rescan
//! on a fixed interval for filesystems without notifications. Events are
//! hints: the monitor always confirms them against the disk.

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use super::state::FileStamp;
use crate::config::{ObserverConfig, WatchBackendKind};
use crate::error::{Result, SentinelError};

/// Wait for file writes to settle before reporting
const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Something happened at this path; it may exist or not
    Touched(PathBuf),
    /// Compare the whole tree against known state
    Rescan,
    /// The backend failed; the monitor restarts it with backoff
    Failed(String),
}

pub trait WatchBackend: Send {
    fn name(&self) -> &'static str;

    /// Start delivering events for `root` into `events`
    fn watch(&mut self, root: &Path, recursive: bool, events: UnboundedSender<WatchEvent>) -> Result<()>;
}

pub fn create_backend(config: &ObserverConfig) -> Box<dyn WatchBackend> {
    match config.backend {
        WatchBackendKind::Notify => Box::new(NotifyBackend::default()),
        WatchBackendKind::Polling => Box::new(PollingBackend::new(config.poll_interval())),
    }
}

/// OS notifications, debounced
#[derive(Default)]
pub struct NotifyBackend {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl WatchBackend for NotifyBackend {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn watch(&mut self, root: &Path, recursive: bool, events: UnboundedSender<WatchEvent>) -> Result<()> {
        // Stop existing watcher if any
        self.debouncer = None;

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            None,
            move |result: std::result::Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(batch) => {
                    for event in batch {
                        for path in &event.paths {
                            let _ = events.send(WatchEvent::Touched(path.clone()));
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        let _ = events.send(WatchEvent::Failed(error.to_string()));
                    }
                }
            },
        )
        .map_err(|e| SentinelError::Io(format!("Failed to create watcher: {}", e)))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debouncer
            .watch(root, mode)
            .map_err(|e| SentinelError::Io(format!("Failed to watch {}: {}", root.display(), e)))?;

        self.debouncer = Some(debouncer);
        Ok(())
    }
}

/// Periodic full rescans
pub struct PollingBackend {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl PollingBackend {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(10)),
            task: None,
        }
    }
}

impl WatchBackend for PollingBackend {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn watch(&mut self, root: &Path, _recursive: bool, events: UnboundedSender<WatchEvent>) -> Result<()> {
        if !root.is_dir() {
            return Err(SentinelError::NotFound(format!(
                "Watch path not found: {}",
                root.display()
            )));
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately, skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if events.send(WatchEvent::Rescan).is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }
}

impl Drop for PollingBackend {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Temporary, hidden and partially downloaded files are never observed
pub fn is_ignored(path: &Path) -> bool {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.starts_with("~$")
        || file_name.ends_with(".tmp")
        || file_name.ends_with(".crdownload")
        || file_name.ends_with(".part")
        || file_name.ends_with(".download")
}

/// Stamp for one path, or `None` if it is not an observable file.
/// Zero-byte files are skipped: they are usually still being written.
pub fn stamp(path: &Path) -> Option<FileStamp> {
    if is_ignored(path) {
        return None;
    }
    let meta = std::fs::symlink_metadata(path).ok()?;
    if !meta.is_file() || meta.len() == 0 {
        return None;
    }
    let modified_at: DateTime<Utc> = meta.modified().ok()?.into();
    Some(FileStamp {
        path: path.to_path_buf(),
        size: meta.len(),
        modified_at,
    })
}

/// Every observable file under `root`
pub fn scan_tree(root: &Path, recursive: bool) -> Result<Vec<FileStamp>> {
    if !root.is_dir() {
        return Err(SentinelError::NotFound(format!(
            "Watch path not found: {}",
            root.display()
        )));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(if recursive { usize::MAX } else { 1 });

    Ok(walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| stamp(e.path()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_ignored() {
        assert!(is_ignored(Path::new("/w/.DS_Store")));
        assert!(is_ignored(Path::new("/w/movie.mkv.crdownload")));
        assert!(is_ignored(Path::new("/w/draft.tmp")));
        assert!(is_ignored(Path::new("/w/~$report.docx")));
        assert!(!is_ignored(Path::new("/w/report.docx")));
    }

    #[test]
    fn test_scan_tree_skips_empty_and_hidden() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "h").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "b").unwrap();
        std::fs::write(dir.path().join(".git/config"), "c").unwrap();

        let mut flat: Vec<_> = scan_tree(dir.path(), false)
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        flat.sort();
        assert_eq!(flat, vec![dir.path().join("a.txt")]);

        assert_eq!(scan_tree(dir.path(), true).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_polling_backend_requests_rescans() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut backend = PollingBackend::new(Duration::from_millis(20));
        backend.watch(dir.path(), true, tx).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(WatchEvent::Rescan));
    }
}
