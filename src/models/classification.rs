//! Classification signals and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Category assigned when no signal fires
pub const UNSORTED: &str = "unsorted";

/// Where a signal came from
///
/// Variants are declared in ascending tie-break priority, so the derived
/// `Ord` can be used directly: `learned > vision/audio > content > filename`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Filename,
    Content,
    Audio,
    Vision,
    Learned,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::Content => "content",
            Self::Audio => "audio",
            Self::Vision => "vision",
            Self::Learned => "learned",
        }
    }

    /// Tie-break rank. Vision and audio share a tier.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Filename => 0,
            Self::Content => 1,
            Self::Audio | Self::Vision => 2,
            Self::Learned => 3,
        }
    }

    /// Maximum confidence a single signal of this tier can contribute
    pub fn ceiling(&self) -> f64 {
        match self {
            Self::Learned => 1.0,
            Self::Vision | Self::Audio => 0.90,
            Self::Content => 0.75,
            Self::Filename => 0.60,
        }
    }
}

/// One `(category, confidence)` contribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub source: SignalSource,
    /// Slash-delimited taxonomy path, e.g. `legal/contracts`
    pub category: String,
    pub confidence: f64,
    /// Human readable description of what fired
    pub reason: String,
}

impl Signal {
    /// Create a signal, clamping confidence to the tier ceiling
    pub fn new(
        source: SignalSource,
        category: impl Into<String>,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        let confidence = if confidence.is_finite() { confidence } else { 0.0 };
        Self {
            source,
            category: normalize_category(&category.into()),
            confidence: confidence.clamp(0.0, source.ceiling()),
            reason: reason.into(),
        }
    }
}

/// Output of an external vision/audio analyzer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub source: SignalSource,
    pub category: String,
    pub confidence: f64,
    pub reasoning: String,
}

impl Suggestion {
    pub fn into_signal(self) -> Signal {
        Signal::new(self.source, self.category, self.confidence, self.reasoning)
    }
}

/// Result of one classification attempt. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub category: String,
    /// Always within `[0, 1]`
    pub confidence: f64,
    /// Contributing signals in order of contribution, strongest first
    pub reasoning: Vec<String>,
    pub source: SignalSource,
}

impl ClassificationResult {
    pub fn unsorted() -> Self {
        Self {
            category: UNSORTED.to_string(),
            confidence: 0.0,
            reasoning: vec!["No signals matched".to_string()],
            source: SignalSource::Filename,
        }
    }

    pub fn is_unsorted(&self) -> bool {
        self.category == UNSORTED
    }
}

/// Input signals plus outcome, delivered to the learner after every attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationEvent {
    pub id: uuid::Uuid,
    pub path: PathBuf,
    /// Keys describing the file (`name:invoice`, `ext:pdf`, `mime:application/pdf`)
    pub signal_keys: Vec<String>,
    pub signals: Vec<Signal>,
    pub result: ClassificationResult,
    /// Content fingerprint of the classified file, when known
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ClassificationEvent {
    pub fn new(
        path: PathBuf,
        signal_keys: Vec<String>,
        signals: Vec<Signal>,
        result: ClassificationResult,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            path,
            signal_keys,
            signals,
            result,
            fingerprint: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        self.fingerprint = (!fingerprint.is_empty()).then_some(fingerprint);
        self
    }

    /// Whether this event is a manual move observed on disk
    pub fn is_verified_example(&self) -> bool {
        self.result.source == SignalSource::Learned && self.result.confidence >= 1.0
    }
}

/// Normalize a taxonomy path: lowercase segments, trimmed, no empty segments
pub fn normalize_category(raw: &str) -> String {
    let segments: Vec<String> = raw
        .split(['/', '\\'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .collect();

    if segments.is_empty() {
        UNSORTED.to_string()
    } else {
        segments.join("/")
    }
}

/// Number of segments in a taxonomy path
pub fn category_depth(category: &str) -> usize {
    category.split('/').filter(|s| !s.is_empty()).count()
}
