//! Classification
//!
//! - `filename`: keyword rules over name tokens
//! - `content`: MIME type and text preview phrases
//! - `analyzer`: rate-limited external vision/audio analyzers
//! - `coordinator`: fuses all tiers into one `ClassificationResult`
//! - `gate`: maps a result and a confidence mode to an `Action`

pub mod analyzer;
pub mod content;
pub mod coordinator;
pub mod filename;
pub mod gate;

pub use analyzer::{AnalysisOutcome, Analyzer, AnalyzerPool};
pub use coordinator::{fuse, Classifier};
pub use gate::{decide, Action, ConfidenceGate};
