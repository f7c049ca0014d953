//! Adaptive learner
//!
//! A single task owns the [`PatternStore`] and applies every change in the
//! order it was sent, so counters never race. Callers talk to it through a
//! cloneable [`LearnerHandle`]; events are fire-and-forget, corrections and
//! maintenance commands wait for an acknowledgement. Predictions read the
//! published snapshot directly and never go through the task.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::patterns::{PatternChanges, PatternReader, PatternStore, StatDelta};
use crate::config::LearningConfig;
use crate::error::{Result, SentinelError};
use crate::models::{normalize_category, ClassificationEvent, SignalSource};

type Responder<T> = oneshot::Sender<Result<T>>;

enum Command {
    Event(Box<ClassificationEvent>),
    Correction {
        signal_keys: Vec<String>,
        predicted: String,
        chosen: String,
        respond: Responder<()>,
    },
    Decay {
        respond: Responder<usize>,
    },
    Flush {
        respond: Responder<()>,
    },
    Shutdown {
        respond: Responder<()>,
    },
}

#[derive(Clone)]
pub struct LearnerHandle {
    tx: mpsc::UnboundedSender<Command>,
    reader: PatternReader,
}

impl LearnerHandle {
    /// Queue a classification event. Never blocks.
    pub fn record_event(&self, event: ClassificationEvent) {
        if self.tx.send(Command::Event(Box::new(event))).is_err() {
            debug!("Learner stopped, classification event dropped");
        }
    }

    /// Teach the store that files with these keys belong in `chosen`, not
    /// `predicted`. Returns once the change is durable.
    pub async fn record_correction(
        &self,
        signal_keys: Vec<String>,
        predicted: &str,
        chosen: &str,
    ) -> Result<()> {
        let predicted = normalize_category(predicted);
        let chosen = normalize_category(chosen);
        self.send_and_wait(|respond| Command::Correction {
            signal_keys,
            predicted,
            chosen,
            respond,
        })
        .await
    }

    /// Learned confidence boost per category. Read-only, any concurrency.
    pub fn predict(&self, signal_keys: &[String]) -> HashMap<String, f64> {
        self.reader.predict(signal_keys)
    }

    pub fn reader(&self) -> PatternReader {
        self.reader.clone()
    }

    pub async fn decay(&self) -> Result<usize> {
        self.send_and_wait(|respond| Command::Decay { respond }).await
    }

    /// Wait until everything queued before this call has been applied
    pub async fn flush(&self) -> Result<()> {
        self.send_and_wait(|respond| Command::Flush { respond }).await
    }

    /// Apply everything still queued, close the store and stop the task
    pub async fn close(&self) -> Result<()> {
        self.send_and_wait(|respond| Command::Shutdown { respond }).await
    }

    async fn send_and_wait<T>(&self, make_cmd: impl FnOnce(Responder<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make_cmd(tx))
            .map_err(|_| SentinelError::Storage("Learner is not running".to_string()))?;
        rx.await
            .map_err(|_| SentinelError::Storage("Learner stopped before replying".to_string()))?
    }
}

pub struct Learner {
    store: PatternStore,
    config: LearningConfig,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Learner {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(store: PatternStore, config: LearningConfig) -> (LearnerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LearnerHandle {
            tx,
            reader: store.reader(),
        };
        let learner = Self { store, config, rx };
        let join = tokio::spawn(learner.run());
        (handle, join)
    }

    async fn run(mut self) {
        info!("Learner started");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Event(event) => {
                    if let Err(e) = self.apply_event(&event) {
                        error!(path = %event.path.display(), error = %e, "Failed to learn from event");
                    }
                }
                Command::Correction {
                    signal_keys,
                    predicted,
                    chosen,
                    respond,
                } => {
                    let result = self.apply_correction(&signal_keys, &predicted, &chosen);
                    let _ = respond.send(result);
                }
                Command::Decay { respond } => {
                    let result = self.store.decay(self.config.decay_factor, Utc::now());
                    let _ = respond.send(result);
                }
                Command::Flush { respond } => {
                    let _ = respond.send(Ok(()));
                }
                Command::Shutdown { respond } => {
                    // Commands are ordered, so everything sent earlier is applied
                    self.rx.close();
                    while let Ok(command) = self.rx.try_recv() {
                        if let Command::Event(event) = command {
                            if let Err(e) = self.apply_event(&event) {
                                warn!(error = %e, "Dropping event during shutdown");
                            }
                        }
                    }
                    self.store.close();
                    let _ = respond.send(Ok(()));
                    break;
                }
            }
        }

        self.store.close();
        info!("Learner stopped");
    }

    fn apply_event(&mut self, event: &ClassificationEvent) -> Result<()> {
        let result = &event.result;
        let mut changes = PatternChanges::new();

        if event.is_verified_example() {
            changes
                .adjust(&event.signal_keys, &result.category, self.config.verified_weight as i64)
                .stat(&result.category, StatDelta::VerifiedExample);
        } else if result.is_unsorted() {
            return Ok(());
        } else {
            changes.stat(&result.category, StatDelta::Classified);
            // An unconfirmed guess counts once per content. Learned results only
            // echo existing patterns and never count.
            let unseen = event
                .fingerprint
                .as_deref()
                .filter(|fp| !self.store.has_reinforced(fp));
            if let Some(fingerprint) = unseen {
                if result.confidence >= self.config.min_event_confidence
                    && result.source != SignalSource::Learned
                {
                    changes
                        .adjust(&event.signal_keys, &result.category, 1)
                        .mark_reinforced(fingerprint, &result.category);
                }
            }
        }

        self.store.apply(changes, event.occurred_at)
    }

    fn apply_correction(&mut self, signal_keys: &[String], predicted: &str, chosen: &str) -> Result<()> {
        if predicted == chosen {
            return Ok(());
        }
        let weight = self.config.correction_weight as i64;

        let mut changes = PatternChanges::new();
        changes
            .adjust(signal_keys, chosen, weight)
            .adjust(signal_keys, predicted, -weight)
            .stat(chosen, StatDelta::CorrectedIn)
            .stat(predicted, StatDelta::CorrectedOut);
        self.store.apply(changes, Utc::now())?;

        info!(predicted, chosen, keys = signal_keys.len(), "Correction recorded");
        Ok(())
    }
}
