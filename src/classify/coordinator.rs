//! Classification coordinator
//!
//! Collects signals from every tier, fuses them into one result and reports
//! the attempt to the learner. Tiers, strongest first:
//!
//! | tier          | ceiling |
//! |---------------|---------|
//! | learned       | 1.00    |
//! | vision/audio  | 0.90    |
//! | content       | 0.75    |
//! | filename      | 0.60    |
//!
//! Every tier contributes. A category's score is the sum of its signals,
//! capped at 1.0, so independent agreement beats a single strong signal.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;
use tracing::debug;

use super::analyzer::AnalyzerPool;
use super::content::ContentClassifier;
use super::filename::FilenameClassifier;
use crate::error::{Result, SentinelError};
use crate::learning::LearnerHandle;
use crate::models::{
    category_depth, ClassificationEvent, ClassificationResult, FileDescriptor, Signal,
    SignalSource, Suggestion,
};

/// Learned boosts below this are noise
const MIN_LEARNED_BOOST: f64 = 0.05;

const SCORE_EPSILON: f64 = 1e-9;

pub struct Classifier {
    filename: FilenameClassifier,
    content: ContentClassifier,
    analyzers: Option<Arc<AnalyzerPool>>,
    learner: LearnerHandle,
}

impl Classifier {
    pub fn new(learner: LearnerHandle, analyzers: Option<Arc<AnalyzerPool>>) -> Self {
        Self {
            filename: FilenameClassifier::new(),
            content: ContentClassifier::new(),
            analyzers,
            learner,
        }
    }

    /// Learning keys for a file: name tokens, extension and MIME type
    pub fn signal_keys(&self, file: &FileDescriptor) -> Vec<String> {
        let mut keys = self.filename.signal_keys(file);
        if let Some(key) = self.content.signal_key(file) {
            keys.push(key);
        }
        keys
    }

    /// Classify `file`, merging `suggestions` from external analyzers
    ///
    /// Fails with `Validation` only when the file cannot be read. Analyzer
    /// failures drop their signal and are noted in the reasoning.
    pub async fn classify(
        &self,
        file: &FileDescriptor,
        suggestions: Vec<Suggestion>,
    ) -> Result<ClassificationResult> {
        File::open(&file.path).map_err(|e| {
            SentinelError::Validation(format!("Cannot read {}: {}", file.path.display(), e))
        })?;

        let mut signals = self.filename.signals(file);
        signals.extend(self.content.signals(file)?);
        signals.extend(suggestions.into_iter().map(Suggestion::into_signal));

        let mut dropped = Vec::new();
        if let Some(pool) = &self.analyzers {
            let outcome = pool.analyze(file).await;
            signals.extend(outcome.signals);
            dropped = outcome.dropped;
        }

        let signal_keys = self.signal_keys(file);
        for (category, boost) in self.learner.predict(&signal_keys) {
            if boost >= MIN_LEARNED_BOOST {
                signals.push(Signal::new(
                    SignalSource::Learned,
                    category,
                    boost,
                    "learned from past decisions",
                ));
            }
        }

        let mut result = fuse(&signals);
        result.reasoning.extend(dropped);

        debug!(
            path = %file.path.display(),
            category = %result.category,
            confidence = result.confidence,
            source = result.source.as_str(),
            signals = signals.len(),
            "File classified"
        );

        self.learner.record_event(
            ClassificationEvent::new(file.path.clone(), signal_keys, signals, result.clone())
                .with_fingerprint(file.fingerprint.clone()),
        );
        Ok(result)
    }
}

#[derive(Debug)]
struct CategoryScore<'a> {
    category: &'a str,
    total: f64,
    best_source: SignalSource,
    signals: Vec<&'a Signal>,
}

/// Fuse signals into one result
///
/// Winner: highest summed confidence. Ties go to the deeper taxonomy path,
/// then to the highest-priority source among the contributing signals. The
/// result's `source` is that highest-priority contributing source.
pub fn fuse(signals: &[Signal]) -> ClassificationResult {
    let mut scores: HashMap<&str, CategoryScore<'_>> = HashMap::new();

    for signal in signals.iter().filter(|s| s.confidence > 0.0) {
        let score = scores
            .entry(signal.category.as_str())
            .or_insert_with(|| CategoryScore {
                category: signal.category.as_str(),
                total: 0.0,
                best_source: signal.source,
                signals: Vec::new(),
            });
        score.total += signal.confidence;
        if signal.source.priority() > score.best_source.priority() {
            score.best_source = signal.source;
        }
        score.signals.push(signal);
    }

    let Some(winner) = scores.into_values().max_by(compare_scores) else {
        return ClassificationResult::unsorted();
    };

    let mut contributing = winner.signals;
    contributing.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then(b.source.priority().cmp(&a.source.priority()))
    });

    ClassificationResult {
        category: winner.category.to_string(),
        confidence: winner.total.clamp(0.0, 1.0),
        reasoning: contributing
            .iter()
            .map(|s| format!("{}: {} ({:.2})", s.source.as_str(), s.reason, s.confidence))
            .collect(),
        source: winner.best_source,
    }
}

/// Ascending order; the greatest score wins
fn compare_scores(a: &CategoryScore<'_>, b: &CategoryScore<'_>) -> Ordering {
    // Compare capped totals: two categories that both saturate are tied
    let (ta, tb) = (a.total.min(1.0), b.total.min(1.0));
    let by_total = if (ta - tb).abs() <= SCORE_EPSILON {
        Ordering::Equal
    } else {
        ta.partial_cmp(&tb).unwrap_or(Ordering::Equal)
    };

    by_total
        .then_with(|| category_depth(a.category).cmp(&category_depth(b.category)))
        .then_with(|| a.best_source.priority().cmp(&b.best_source.priority()))
        // Deterministic last resort: alphabetical order wins
        .then_with(|| b.category.cmp(a.category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNSORTED;
    use proptest::prelude::*;

    fn signal(source: SignalSource, category: &str, confidence: f64) -> Signal {
        Signal::new(source, category, confidence, "test")
    }

    #[test]
    fn test_no_signals_is_unsorted() {
        let result = fuse(&[]);
        assert_eq!(result.category, UNSORTED);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_agreement_beats_single_strong_signal() {
        let result = fuse(&[
            signal(SignalSource::Vision, "images", 0.8),
            signal(SignalSource::Filename, "finance/receipts", 0.5),
            signal(SignalSource::Content, "finance/receipts", 0.5),
        ]);
        assert_eq!(result.category, "finance/receipts");
        assert!((result.confidence - 1.0).abs() < 1e-9);
        assert_eq!(result.source, SignalSource::Content);
        assert_eq!(result.reasoning.len(), 2);
    }

    #[test]
    fn test_sum_is_capped() {
        let result = fuse(&[
            signal(SignalSource::Filename, "legal/contracts", 0.6),
            signal(SignalSource::Filename, "legal/contracts", 0.5),
        ]);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_tie_prefers_deeper_path() {
        let result = fuse(&[
            signal(SignalSource::Content, "documents", 0.5),
            signal(SignalSource::Filename, "documents/reports", 0.5),
        ]);
        assert_eq!(result.category, "documents/reports");
    }

    #[test]
    fn test_tie_at_same_depth_prefers_source_priority() {
        let result = fuse(&[
            signal(SignalSource::Filename, "images", 0.5),
            signal(SignalSource::Learned, "videos", 0.5),
        ]);
        assert_eq!(result.category, "videos");
        assert_eq!(result.source, SignalSource::Learned);

        let result = fuse(&[
            signal(SignalSource::Content, "images", 0.5),
            signal(SignalSource::Audio, "music", 0.5),
        ]);
        assert_eq!(result.category, "music");
    }

    #[test]
    fn test_zero_confidence_signals_are_ignored() {
        let result = fuse(&[signal(SignalSource::Vision, "images", 0.0)]);
        assert!(result.is_unsorted());
    }

    proptest! {
        #[test]
        fn confidence_always_within_bounds(
            raw in proptest::collection::vec((0usize..5, 0usize..4, -2.0f64..3.0), 0..20)
        ) {
            let sources = [
                SignalSource::Filename,
                SignalSource::Content,
                SignalSource::Vision,
                SignalSource::Audio,
                SignalSource::Learned,
            ];
            let categories = ["a", "a/b", "c", "c/d/e"];
            let signals: Vec<Signal> = raw
                .into_iter()
                .map(|(s, c, conf)| signal(sources[s], categories[c], conf))
                .collect();

            let result = fuse(&signals);
            prop_assert!(result.confidence >= 0.0 && result.confidence <= 1.0);
        }
    }
}
