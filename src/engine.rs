//! Engine facade
//!
//! [`Sentinel`] owns every component and exposes the core operations:
//! classify, decide, organize, corrections, the rollback log, deduplication
//! and the background observer. One `Sentinel` per data directory: a second
//! process opening the same directory is refused.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{Action, Analyzer, AnalyzerPool, Classifier, ConfidenceGate};
use crate::config::{ConfidenceMode, EngineConfig};
use crate::dedup::{CleanResult, Deduplicator, DuplicateGroup, ScanScope};
use crate::error::{Result, SentinelError};
use crate::learning::{Learner, LearnerHandle, PatternSnapshot, PatternStore};
use crate::models::{
    normalize_category, BulkUndoResult, ClassificationResult, FileDescriptor, FileStatus,
    Operation, OperationRequest, Suggestion, UndoOutcome, UNSORTED,
};
use crate::observer::{system_clock, Clock, Observer, ObserverContext, WatchRole};
use crate::rollback::io::unique_destination;
use crate::rollback::{OperationDrift, RollbackLog};
use crate::storage::{queries, Store};

/// What `organize` did with a file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeOutcome {
    pub result: ClassificationResult,
    pub action: Action,
    /// Set when the file was moved
    pub operation_id: Option<u64>,
    pub destination: Option<PathBuf>,
}

pub struct Sentinel {
    config: EngineConfig,
    store: Store,
    log: Arc<RollbackLog>,
    learner: LearnerHandle,
    learner_task: Option<JoinHandle<()>>,
    classifier: Arc<Classifier>,
    gate: ConfidenceGate,
    dedup: Deduplicator,
    observer: Option<Observer>,
    clock: Clock,
    _lock: File,
}

impl Sentinel {
    pub async fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with_analyzers(config, Vec::new()).await
    }

    /// Open the engine with external vision/audio analyzers registered
    pub async fn open_with_analyzers(
        config: EngineConfig,
        analyzers: Vec<Arc<dyn Analyzer>>,
    ) -> Result<Self> {
        config.validate()?;

        for dir in [&config.data_dir, &config.library_root] {
            std::fs::create_dir_all(dir).map_err(|e| {
                SentinelError::Storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        let lock = lock_data_dir(&config.lock_path())?;

        let store = Store::open(&config.database_path())?;
        let log = Arc::new(RollbackLog::open(store.clone(), config.pending_dir())?);

        let patterns = PatternStore::open(store.clone(), config.learning.min_support)?;
        let (learner, learner_task) = Learner::spawn(patterns, config.learning.clone());

        let pool = if analyzers.is_empty() {
            None
        } else {
            let mut pool = AnalyzerPool::new(&config.analyzer);
            for analyzer in analyzers {
                pool.register(analyzer);
            }
            Some(Arc::new(pool))
        };
        let classifier = Arc::new(Classifier::new(learner.clone(), pool));
        let gate = ConfidenceGate::new(config.mode, config.thresholds);
        let dedup = Deduplicator::new(Arc::clone(&log), store.clone(), config.recycle_dir());

        info!(
            data_dir = %config.data_dir.display(),
            library_root = %config.library_root.display(),
            mode = config.mode.as_str(),
            operations = log.snapshot().len(),
            "Sentinel opened"
        );

        Ok(Self {
            config,
            store,
            log,
            learner,
            learner_task: Some(learner_task),
            classifier,
            gate,
            dedup,
            observer: None,
            clock: system_clock(),
            _lock: lock,
        })
    }

    /// Replace the clock used by the observer's cooldown decisions
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ============ Classification ============

    pub async fn classify(
        &self,
        file: &FileDescriptor,
        suggestions: Vec<Suggestion>,
    ) -> Result<ClassificationResult> {
        self.classifier.classify(file, suggestions).await
    }

    /// Gate decision under the configured mode
    pub fn decide(&self, result: &ClassificationResult) -> Action {
        self.gate.decide(result)
    }

    pub fn decide_with(&self, result: &ClassificationResult, mode: ConfidenceMode) -> Action {
        crate::classify::decide(result, mode, &self.config.thresholds)
    }

    /// Classify, then move into the library when the gate allows it;
    /// otherwise mark the file for review
    pub async fn organize(
        &self,
        file: &FileDescriptor,
        suggestions: Vec<Suggestion>,
    ) -> Result<OrganizeOutcome> {
        let result = self.classify(file, suggestions).await?;
        let action = self.decide(&result);

        if action == Action::AutoOrganize && !result.is_unsorted() {
            let destination =
                plan_destination(&self.config.library_root, &result.category, &file.file_name());
            let request =
                OperationRequest::organize(file.path.clone(), destination.clone(), result.confidence);
            let operation_id = self.record_blocking(request).await?;

            return Ok(OrganizeOutcome {
                result,
                action,
                operation_id: Some(operation_id),
                destination: Some(destination),
            });
        }

        let review = FileDescriptor {
            status: FileStatus::PendingReview,
            ..file.clone()
        };
        self.store
            .with_conn(|conn| queries::upsert_file(conn, &review))?;
        debug!(
            path = %file.path.display(),
            category = %result.category,
            confidence = result.confidence,
            "Queued for review"
        );

        Ok(OrganizeOutcome {
            result,
            action: Action::ReviewQueue,
            operation_id: None,
            destination: None,
        })
    }

    /// Files waiting for a human decision
    pub fn pending_review(&self) -> Result<Vec<FileDescriptor>> {
        self.store
            .with_conn(|conn| queries::files_by_status(conn, FileStatus::PendingReview))
    }

    // ============ Learning ============

    /// The user filed `file` under `chosen` instead of `predicted`
    pub async fn record_correction(
        &self,
        file: &FileDescriptor,
        predicted: &str,
        chosen: &str,
    ) -> Result<()> {
        let chosen = normalize_category(chosen);
        if chosen == UNSORTED {
            return Err(SentinelError::Validation(
                "A correction needs a target category".to_string(),
            ));
        }
        let signal_keys = self.classifier.signal_keys(file);
        self.learner
            .record_correction(signal_keys, predicted, &chosen)
            .await?;
        info!(
            path = %file.path.display(),
            predicted = %predicted,
            chosen = %chosen,
            "Correction recorded"
        );
        Ok(())
    }

    /// Learned confidence boost per category
    pub fn predict(&self, file: &FileDescriptor) -> HashMap<String, f64> {
        self.learner.predict(&self.classifier.signal_keys(file))
    }

    pub fn patterns(&self) -> Arc<PatternSnapshot> {
        self.learner.reader().snapshot()
    }

    /// Age every pattern count. Returns the number of rows touched.
    pub async fn decay(&self) -> Result<usize> {
        self.learner.decay().await
    }

    /// Wait until queued learning events are applied
    pub async fn flush_learning(&self) -> Result<()> {
        self.learner.flush().await
    }

    // ============ Rollback log ============

    pub fn record(&self, request: OperationRequest) -> Result<u64> {
        self.log.record(request)
    }

    /// Rename a file in place. `new_name` must be a bare file name.
    pub fn rename(&self, path: &Path, new_name: &str) -> Result<u64> {
        let name = new_name.trim();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(SentinelError::Validation(format!(
                "Invalid file name: {:?}",
                new_name
            )));
        }
        let parent = path.parent().ok_or_else(|| {
            SentinelError::Validation(format!("Cannot rename {}", path.display()))
        })?;
        self.log
            .record(OperationRequest::rename(path.to_path_buf(), parent.join(name)))
    }

    pub fn undo(&self, operation_id: u64) -> Result<UndoOutcome> {
        self.log.undo(operation_id)
    }

    pub fn undo_all_since(&self, since: DateTime<Utc>) -> BulkUndoResult {
        self.log.undo_all_since(since, None)
    }

    /// Like [`Self::undo_all_since`], stopping between items once `cancel` is set
    pub fn undo_all_since_cancellable(
        &self,
        since: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> BulkUndoResult {
        self.log.undo_all_since(since, Some(cancel))
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.log.operations()
    }

    pub fn operation(&self, operation_id: u64) -> Option<Operation> {
        self.log.get(operation_id)
    }

    pub fn active_since(&self, since: DateTime<Utc>) -> Vec<Operation> {
        self.log.active_since(since)
    }

    pub fn verify(&self) -> Vec<OperationDrift> {
        self.log.verify()
    }

    pub fn file(&self, path: &Path) -> Result<Option<FileDescriptor>> {
        self.store.with_conn(|conn| queries::get_file(conn, path))
    }

    async fn record_blocking(&self, request: OperationRequest) -> Result<u64> {
        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || log.record(request))
            .await
            .map_err(|e| SentinelError::Io(format!("Move task failed: {}", e)))?
    }

    // ============ Deduplication ============

    pub fn scan(&self, scope: &ScanScope) -> Result<Vec<DuplicateGroup>> {
        self.dedup.scan(scope)
    }

    pub fn clean(&self, group: &DuplicateGroup, keep_index: usize) -> Result<CleanResult> {
        self.dedup.clean(group, keep_index)
    }

    // ============ Observer ============

    /// Start watching the configured paths. No-op when already running.
    pub fn start_observer(&mut self) -> Result<()> {
        if self.observer.is_some() {
            return Ok(());
        }
        if self.config.observer.watch_paths.is_empty() {
            return Err(SentinelError::Config(
                "No watch paths configured".to_string(),
            ));
        }

        let ctx = ObserverContext::new(
            self.store.clone(),
            Arc::clone(&self.log),
            Arc::clone(&self.classifier),
            self.gate,
            self.learner.clone(),
            self.config.library_root.clone(),
            self.config.observer.clone(),
        )
        .with_clock(Arc::clone(&self.clock));

        self.observer = Some(Observer::start(Arc::new(ctx)));
        Ok(())
    }

    pub fn watched(&self) -> Vec<(PathBuf, WatchRole)> {
        self.observer
            .as_ref()
            .map(Observer::watched)
            .unwrap_or_default()
    }

    /// Stop one watched path, leaving the others running
    pub async fn stop_watching(&mut self, path: &Path) -> bool {
        match self.observer.as_mut() {
            Some(observer) => observer.stop_path(path).await,
            None => false,
        }
    }

    pub async fn stop_observer(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.stop().await;
        }
    }

    /// Stop the observer, apply queued learning events and close the store
    pub async fn close(mut self) -> Result<()> {
        self.stop_observer().await;
        self.learner.close().await?;
        if let Some(task) = self.learner_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Learner task ended abnormally");
            }
        }
        info!("Sentinel closed");
        Ok(())
    }
}

/// Where an organized file lands: `library_root/<category>/<file_name>`,
/// with a ` (n)` suffix when the name is taken
pub fn plan_destination(library_root: &Path, category: &str, file_name: &str) -> PathBuf {
    let dir = normalize_category(category)
        .split('/')
        .fold(library_root.to_path_buf(), |dir, segment| dir.join(segment));
    unique_destination(&dir, file_name)
}

fn lock_data_dir(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| {
            SentinelError::Storage(format!("Failed to open lock file {}: {}", path.display(), e))
        })?;
    file.try_lock_exclusive().map_err(|_| {
        SentinelError::Storage(format!(
            "Data directory is in use by another process: {}",
            path.display()
        ))
    })?;
    Ok(file)
}
