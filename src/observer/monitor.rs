//! Per-path watch loop
//!
//! Each watched path runs its own task: start a backend, reconcile the tree
//! against known state, then react to backend events and a periodic tick
//! until told to stop. A failed session (missing directory, backend error,
//! store hiccup) is retried with exponential backoff without affecting the
//! other paths.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::backend::{create_backend, scan_tree, WatchEvent};
use super::state::{self, FileStamp};
use super::tracker::{Arrival, Departure, ManualMove, MoveTracker};
use crate::classify::{Action, Classifier, ConfidenceGate};
use crate::config::ObserverConfig;
use crate::engine::plan_destination;
use crate::error::{Result, SentinelError};
use crate::fingerprint::fingerprint_file;
use crate::learning::LearnerHandle;
use crate::models::{
    normalize_category, ClassificationEvent, ClassificationResult, FileDescriptor, FileStatus,
    OperationRequest, SignalSource, WatchEntry, UNSORTED,
};
use crate::rollback::RollbackLog;
use crate::storage::{queries, Store};

/// Source of "now" for cooldown decisions
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Shared by every monitor of one observer
pub struct ObserverContext {
    pub store: Store,
    pub log: Arc<RollbackLog>,
    pub classifier: Arc<Classifier>,
    pub gate: ConfidenceGate,
    pub learner: LearnerHandle,
    pub library_root: PathBuf,
    pub config: ObserverConfig,
    clock: Clock,
    tracker: Mutex<MoveTracker>,
}

impl ObserverContext {
    pub fn new(
        store: Store,
        log: Arc<RollbackLog>,
        classifier: Arc<Classifier>,
        gate: ConfidenceGate,
        learner: LearnerHandle,
        library_root: PathBuf,
        config: ObserverConfig,
    ) -> Self {
        let window = chrono::Duration::seconds(config.move_match_window_secs.max(0));
        Self {
            store,
            log,
            classifier,
            gate,
            learner,
            library_root,
            config,
            clock: system_clock(),
            tracker: Mutex::new(MoveTracker::new(window)),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn track<T>(&self, f: impl FnOnce(&mut MoveTracker) -> T) -> T {
        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut tracker)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchRole {
    /// Files wait out the cooldown here and may be organized
    Inbox,
    /// The category tree. Only arrivals matter: they complete manual moves.
    Library,
}

impl WatchRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Library => "library",
        }
    }
}

/// Handle to a running monitor task
pub(crate) struct MonitorHandle {
    pub root: PathBuf,
    pub role: WatchRole,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the task and wait until it has persisted its state
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(root = %self.root.display(), error = %e, "Monitor task panicked");
        }
    }
}

pub(crate) struct PathMonitor {
    ctx: Arc<ObserverContext>,
    root: PathBuf,
    recursive: bool,
    role: WatchRole,
    /// Inbox only
    entries: HashMap<PathBuf, WatchEntry>,
    /// Library only: files present at the last reconcile
    known: HashMap<PathBuf, FileStamp>,
    seeded: bool,
    backoff: Duration,
}

impl PathMonitor {
    pub fn spawn(
        ctx: Arc<ObserverContext>,
        root: PathBuf,
        recursive: bool,
        role: WatchRole,
    ) -> MonitorHandle {
        let (shutdown, rx) = watch::channel(false);
        let monitor = Self {
            backoff: ctx.config.retry_initial(),
            ctx,
            root: root.clone(),
            recursive,
            role,
            entries: HashMap::new(),
            known: HashMap::new(),
            seeded: false,
        };
        let join = tokio::spawn(monitor.run(rx));
        MonitorHandle {
            root,
            role,
            shutdown,
            join,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(root = %self.root.display(), role = self.role.as_str(), "Monitor started");

        if let Err(e) = self.load() {
            error!(root = %self.root.display(), error = %e, "Failed to load watch state");
        }

        loop {
            match self.session(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        root = %self.root.display(),
                        error = %e,
                        retry_in_ms = self.backoff.as_millis() as u64,
                        "Watch session failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    self.backoff = (self.backoff * 2).min(self.ctx.config.retry_max());
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        if let Err(e) = self.persist() {
            error!(root = %self.root.display(), error = %e, "Failed to persist watch state");
        }
        info!(root = %self.root.display(), "Monitor stopped");
    }

    /// One backend lifetime. `Ok` means a clean shutdown.
    async fn session(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut backend = create_backend(&self.ctx.config);
        backend.watch(&self.root, self.recursive, tx)?;
        debug!(root = %self.root.display(), backend = backend.name(), "Backend started");

        self.reconcile().await?;
        self.backoff = self.ctx.config.retry_initial();

        let mut tick = tokio::time::interval(self.ctx.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                event = events.recv() => {
                    match event {
                        Some(WatchEvent::Failed(message)) => return Err(SentinelError::Io(message)),
                        Some(_) => {
                            // Coalesce a burst into one rescan
                            while let Ok(next) = events.try_recv() {
                                if let WatchEvent::Failed(message) = next {
                                    return Err(SentinelError::Io(message));
                                }
                            }
                            self.reconcile().await?;
                        }
                        None => return Err(SentinelError::Io("Watch backend stopped".to_string())),
                    }
                }
                _ = tick.tick() => {
                    self.reconcile().await?;
                    self.evaluate().await;
                    self.persist()?;
                }
            }
        }
    }

    fn load(&mut self) -> Result<()> {
        if self.role != WatchRole::Inbox {
            return Ok(());
        }
        let entries = self
            .ctx
            .store
            .with_conn(|conn| queries::load_watch_entries(conn, &self.root))?;
        debug!(root = %self.root.display(), count = entries.len(), "Watch state loaded");
        self.entries = entries.into_iter().map(|e| (e.path.clone(), e)).collect();
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        if self.role != WatchRole::Inbox {
            return Ok(());
        }
        let entries: Vec<WatchEntry> = self.entries.values().cloned().collect();
        self.ctx
            .store
            .transaction(|tx| queries::replace_watch_entries(tx, &self.root, &entries))
    }

    // ============ Reconcile ============

    async fn reconcile(&mut self) -> Result<()> {
        let root = self.root.clone();
        let recursive = self.recursive;
        let stamps = blocking(move || scan_tree(&root, recursive)).await?;
        let on_disk: HashMap<PathBuf, FileStamp> =
            stamps.into_iter().map(|s| (s.path.clone(), s)).collect();
        let now = self.ctx.now();

        match self.role {
            WatchRole::Inbox => self.reconcile_inbox(on_disk, now).await?,
            WatchRole::Library => self.reconcile_library(on_disk, now).await,
        }
        self.seeded = true;
        Ok(())
    }

    async fn reconcile_inbox(
        &mut self,
        on_disk: HashMap<PathBuf, FileStamp>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let gone: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|path| !on_disk.contains_key(*path))
            .cloned()
            .collect();
        for path in gone {
            self.departed(&path, now);
        }

        for (path, stamp) in on_disk {
            match self.entries.get_mut(&path) {
                Some(entry) => {
                    if state::observe(entry, &stamp, now) {
                        debug!(path = %path.display(), "File changed, cooldown restarted");
                    }
                }
                None => {
                    debug!(path = %path.display(), "Observing new file");
                    let entry = state::first_seen(&stamp, &self.root, now);
                    self.entries.insert(path, entry);
                }
            }
        }

        for entry in self.entries.values_mut() {
            if state::advance(entry, now) {
                info!(path = %entry.path.display(), "Cooldown elapsed, file eligible");
            }
        }

        self.fill_fingerprints().await
    }

    async fn reconcile_library(&mut self, on_disk: HashMap<PathBuf, FileStamp>, now: DateTime<Utc>) {
        let arrivals: Vec<FileStamp> = if self.seeded {
            on_disk
                .values()
                .filter(|s| !self.known.contains_key(&s.path))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        self.known = on_disk;

        for stamp in arrivals {
            let log = &self.ctx.log;
            if log.is_busy(&stamp.path) || log.find_active_to(&stamp.path).is_some() {
                // Placed by the engine
                continue;
            }

            let path = stamp.path.clone();
            let fingerprint = match blocking(move || fingerprint_file(&path)).await {
                Ok(fp) => fp,
                Err(e) => {
                    debug!(path = %stamp.path.display(), error = %e, "Arrival unreadable");
                    continue;
                }
            };

            let arrival = Arrival {
                category: category_for(&self.root, &stamp.path),
                path: stamp.path,
                fingerprint,
                size: stamp.size,
                arrived_at: now,
            };
            if let Some(manual) = self.ctx.track(|t| t.arrive(arrival)) {
                self.learn_from(manual);
            }
        }
    }

    /// An inbox entry is no longer on disk
    fn departed(&mut self, path: &Path, now: DateTime<Utc>) {
        let Some(mut entry) = self.entries.remove(path) else {
            return;
        };
        if entry.state.is_terminal() {
            return;
        }

        let log = &self.ctx.log;
        let moved_by_engine = log.is_busy(path)
            || log
                .find_active_from(path)
                .is_some_and(|op| op.timestamp >= entry.first_seen_at);
        if moved_by_engine {
            debug!(path = %path.display(), "File moved by the engine");
            return;
        }

        state::mark_manually_moved(&mut entry);
        info!(path = %path.display(), "File left watched location");

        let Some(fingerprint) = entry.fingerprint.take() else {
            return;
        };
        let departure = Departure {
            path: path.to_path_buf(),
            fingerprint,
            size: entry.size,
            departed_at: now,
        };
        if let Some(manual) = self.ctx.track(|t| t.depart(departure)) {
            self.learn_from(manual);
        }
    }

    /// Report a manual move into the library as a verified example
    fn learn_from(&self, manual: ManualMove) {
        let Some(category) = manual.arrival.category.clone() else {
            debug!(to = %manual.arrival.path.display(), "Manual move to library root, nothing to learn");
            return;
        };

        // Keys come from the name the file had while it waited
        let file = FileDescriptor {
            path: manual.from.clone(),
            fingerprint: manual.arrival.fingerprint.clone(),
            size: manual.arrival.size,
            modified_at: manual.arrival.arrived_at,
            status: FileStatus::Organized,
        };
        let signal_keys = self.ctx.classifier.signal_keys(&file);
        let result = ClassificationResult {
            category: category.clone(),
            confidence: 1.0,
            reasoning: vec![format!("moved by hand from {}", manual.from.display())],
            source: SignalSource::Learned,
        };

        info!(
            from = %manual.from.display(),
            to = %manual.arrival.path.display(),
            category = %category,
            "Manual move recorded as verified example"
        );
        let fingerprint = manual.arrival.fingerprint.clone();
        self.ctx.learner.record_event(
            ClassificationEvent::new(manual.arrival.path, signal_keys, Vec::new(), result)
                .with_fingerprint(fingerprint),
        );
    }

    /// Hash new or changed entries and register them
    async fn fill_fingerprints(&mut self) -> Result<()> {
        let missing: Vec<PathBuf> = self
            .entries
            .values()
            .filter(|e| e.fingerprint.is_none() && !e.state.is_terminal())
            .map(|e| e.path.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let store = self.ctx.store.clone();
        let files = blocking(move || {
            let files: Vec<FileDescriptor> = missing
                .iter()
                .filter_map(|path| match FileDescriptor::from_path(path) {
                    Ok(file) => Some(file),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Cannot fingerprint yet");
                        None
                    }
                })
                .collect();
            store.transaction(|tx| {
                for file in &files {
                    queries::register_file(tx, file)?;
                }
                Ok(())
            })?;
            Ok(files)
        })
        .await?;

        for file in files {
            if let Some(entry) = self.entries.get_mut(&file.path) {
                // A write after the scan is picked up by the next one
                if entry.size == file.size {
                    entry.fingerprint = Some(file.fingerprint);
                }
            }
        }
        Ok(())
    }

    // ============ Evaluate ============

    async fn evaluate(&mut self) {
        if self.role != WatchRole::Inbox {
            return;
        }
        let now = self.ctx.now();
        let reevaluate_after = chrono::Duration::hours(self.ctx.config.reevaluate_after_hours);

        let mut due: Vec<PathBuf> = self
            .entries
            .values()
            .filter(|e| state::due_for_evaluation(e, now, reevaluate_after))
            .map(|e| e.path.clone())
            .collect();
        due.sort();

        for path in due {
            self.evaluate_one(&path, now).await;
        }
    }

    async fn evaluate_one(&mut self, path: &Path, now: DateTime<Utc>) {
        if self.ctx.log.is_busy(path) {
            return;
        }

        let target = path.to_path_buf();
        let file = match blocking(move || FileDescriptor::from_path(&target)).await {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Eligible file unreadable");
                return;
            }
        };
        let unchanged = self.entries.get(path).is_some_and(|e| {
            e.size == file.size && e.fingerprint.as_deref().map_or(true, |fp| fp == file.fingerprint)
        });
        if !unchanged {
            // Next reconcile restarts the cooldown
            return;
        }

        let result = match self.ctx.classifier.classify(&file, Vec::new()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Classification failed");
                self.decline(path, now);
                return;
            }
        };

        let floor = self.ctx.config.unattended_floor();
        let permitted = self
            .entries
            .get(path)
            .is_some_and(|e| state::may_auto_move(e, result.confidence, floor, now));

        if self.ctx.gate.decide(&result) == Action::AutoOrganize
            && permitted
            && !result.is_unsorted()
        {
            match self.auto_move(&file, &result).await {
                Ok(operation_id) => {
                    if let Some(mut entry) = self.entries.remove(path) {
                        state::mark_auto_moved(&mut entry);
                    }
                    info!(
                        operation_id,
                        path = %path.display(),
                        category = %result.category,
                        confidence = result.confidence,
                        "File organized after cooldown"
                    );
                    return;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unattended move failed");
                }
            }
        } else {
            debug!(
                path = %path.display(),
                category = %result.category,
                confidence = result.confidence,
                threshold = self.ctx.gate.threshold(),
                floor,
                "Left for review"
            );
            let review = FileDescriptor {
                status: FileStatus::PendingReview,
                ..file
            };
            if let Err(e) = self
                .ctx
                .store
                .with_conn(|conn| queries::upsert_file(conn, &review))
            {
                warn!(path = %path.display(), error = %e, "Failed to mark file for review");
            }
        }

        self.decline(path, now);
    }

    async fn auto_move(&self, file: &FileDescriptor, result: &ClassificationResult) -> Result<u64> {
        let destination = plan_destination(&self.ctx.library_root, &result.category, &file.file_name());
        let request = OperationRequest::organize(file.path.clone(), destination, result.confidence);
        let log = Arc::clone(&self.ctx.log);
        let timeout = self.ctx.config.move_timeout();

        match tokio::time::timeout(timeout, blocking(move || log.record(request))).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SentinelError::Io(format!(
                "Move timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn decline(&mut self, path: &Path, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(path) {
            state::mark_declined(entry, now);
        }
    }
}

/// Taxonomy path implied by a file's directory under the library root.
/// Files directly in the root carry no category.
pub fn category_for(library_root: &Path, path: &Path) -> Option<String> {
    let relative = path.parent()?.strip_prefix(library_root).ok()?;
    let category = normalize_category(&relative.to_string_lossy());
    (category != UNSORTED).then_some(category)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SentinelError::Io(format!("Blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_for() {
        let root = Path::new("/library");
        assert_eq!(
            category_for(root, Path::new("/library/Finance/Taxes/w2.pdf")).as_deref(),
            Some("finance/taxes")
        );
        assert_eq!(category_for(root, Path::new("/library/w2.pdf")), None);
        assert_eq!(category_for(root, Path::new("/elsewhere/a/w2.pdf")), None);
    }
}
