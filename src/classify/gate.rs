//! Confidence gate
//!
//! Pure policy: `AutoOrganize` iff `confidence >= threshold(mode)`.

use serde::{Deserialize, Serialize};

use crate::config::{ConfidenceMode, ModeThresholds};
use crate::models::ClassificationResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    AutoOrganize,
    ReviewQueue,
}

pub fn decide(result: &ClassificationResult, mode: ConfidenceMode, thresholds: &ModeThresholds) -> Action {
    if result.confidence >= thresholds.threshold(mode) {
        Action::AutoOrganize
    } else {
        Action::ReviewQueue
    }
}

/// A configured mode plus its threshold table
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceGate {
    pub mode: ConfidenceMode,
    pub thresholds: ModeThresholds,
}

impl ConfidenceGate {
    pub fn new(mode: ConfidenceMode, thresholds: ModeThresholds) -> Self {
        Self { mode, thresholds }
    }

    pub fn decide(&self, result: &ClassificationResult) -> Action {
        decide(result, self.mode, &self.thresholds)
    }

    pub fn threshold(&self) -> f64 {
        self.thresholds.threshold(self.mode)
    }
}
