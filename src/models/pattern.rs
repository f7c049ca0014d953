use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discovered correlation between a signal key and a category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    /// e.g. `name:invoice`, `ext:pdf`, `mime:image/png`
    pub signal_key: String,
    pub category: String,
    pub occurrence_count: u64,
    /// Share of this key's occurrences that landed in `category`, scaled by
    /// how much evidence the key has. Recomputed on every write to the key.
    pub confidence_contribution: f64,
    pub updated_at: DateTime<Utc>,
}

/// Running statistics for one category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub category: String,
    pub classifications: u64,
    /// Corrections where the user chose this category
    pub corrections_in: u64,
    /// Corrections where this category was predicted but rejected
    pub corrections_out: u64,
    pub verified_examples: u64,
    pub last_seen_at: DateTime<Utc>,
}

impl CategoryStats {
    pub fn new(category: &str, now: DateTime<Utc>) -> Self {
        Self {
            category: category.to_string(),
            classifications: 0,
            corrections_in: 0,
            corrections_out: 0,
            verified_examples: 0,
            last_seen_at: now,
        }
    }

    /// Fraction of predictions into this category the user rejected
    pub fn rejection_rate(&self) -> Option<f64> {
        if self.classifications == 0 {
            return None;
        }
        Some((self.corrections_out as f64 / self.classifications as f64).min(1.0))
    }
}
