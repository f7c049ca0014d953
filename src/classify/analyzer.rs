//! External vision/audio analyzers
//!
//! Analyzers are network collaborators with real quotas. The pool bounds how
//! many calls run at once, spaces call starts by a minimum interval and puts a
//! timeout on each call. A failed or timed out analyzer drops its signal; it
//! never fails the classification.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::error::{Result, SentinelError};
use crate::models::{FileDescriptor, Signal, SignalSource, Suggestion};

/// A provider that suggests a category for a file
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// `Vision` or `Audio`
    fn source(&self) -> SignalSource;

    fn supports(&self, file: &FileDescriptor) -> bool;

    /// Fails with `ExternalService` when the provider is unavailable
    async fn analyze(&self, file: &FileDescriptor) -> Result<Suggestion>;
}

/// Rate limiter for analyzer calls
///
/// The semaphore bounds concurrency for the whole call; the interval spaces
/// out call starts.
struct RateLimiter {
    semaphore: Semaphore,
    min_interval: Duration,
    last_request: Mutex<Instant>,
}

impl RateLimiter {
    fn new(max_concurrent: usize, requests_per_second: f32) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f32(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            semaphore: Semaphore::new(max_concurrent.max(1)),
            min_interval,
            last_request: Mutex::new(
                Instant::now()
                    .checked_sub(Duration::from_secs(10))
                    .unwrap_or_else(Instant::now),
            ),
        }
    }

    /// Wait for a slot. The returned permit must be held for the whole call.
    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SentinelError::ExternalService("Analyzer pool closed".to_string()))?;

        let wait_time = {
            let mut last = self.last_request.lock().await;
            let elapsed = last.elapsed();
            let wait = self.min_interval.saturating_sub(elapsed);
            *last = Instant::now() + wait;
            wait
        };

        if !wait_time.is_zero() {
            tokio::time::sleep(wait_time).await;
        }
        Ok(permit)
    }
}

/// Signals that arrived plus a note for every analyzer that was dropped
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub signals: Vec<Signal>,
    pub dropped: Vec<String>,
}

pub struct AnalyzerPool {
    analyzers: Vec<Arc<dyn Analyzer>>,
    limiter: RateLimiter,
    timeout: Duration,
}

impl AnalyzerPool {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            analyzers: Vec::new(),
            limiter: RateLimiter::new(config.max_concurrent, config.requests_per_second),
            timeout: config.timeout(),
        }
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        debug!(analyzer = analyzer.name(), "Analyzer registered");
        self.analyzers.push(analyzer);
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Run every analyzer that supports `file`
    pub async fn analyze(&self, file: &FileDescriptor) -> AnalysisOutcome {
        let calls = self
            .analyzers
            .iter()
            .filter(|a| a.supports(file))
            .map(|analyzer| async move {
                let result = self.call(analyzer.as_ref(), file).await;
                (analyzer.name().to_string(), result)
            });

        let mut outcome = AnalysisOutcome::default();
        for (name, result) in join_all(calls).await {
            match result {
                Ok(signal) => outcome.signals.push(signal),
                Err(e) => {
                    warn!(analyzer = %name, path = %file.path.display(), error = %e, "Analyzer dropped");
                    outcome.dropped.push(format!("{} analyzer dropped: {}", name, e));
                }
            }
        }
        outcome
    }

    async fn call(&self, analyzer: &dyn Analyzer, file: &FileDescriptor) -> Result<Signal> {
        let _permit = self.limiter.acquire().await?;

        let suggestion = match tokio::time::timeout(self.timeout, analyzer.analyze(file)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SentinelError::ExternalService(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        // The analyzer decides the category; the pool decides the tier
        let mut signal = suggestion.into_signal();
        if signal.source != analyzer.source() {
            signal = Signal::new(analyzer.source(), signal.category, signal.confidence, signal.reason);
        }
        Ok(signal)
    }
}
