//! Per-file observation state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mandatory observation period before unattended organization.
/// Not configurable.
pub const COOLDOWN_DAYS: i64 = 7;

pub fn cooldown() -> Duration {
    Duration::days(COOLDOWN_DAYS)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Observing,
    Eligible,
    AutoMoved,
    ManuallyMoved,
}

impl WatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observing => "observing",
            Self::Eligible => "eligible",
            Self::AutoMoved => "auto_moved",
            Self::ManuallyMoved => "manually_moved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observing" => Some(Self::Observing),
            "eligible" => Some(Self::Eligible),
            "auto_moved" => Some(Self::AutoMoved),
            "manually_moved" => Some(Self::ManuallyMoved),
            _ => None,
        }
    }

    /// Terminal states: the entry is dropped right after reaching them
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AutoMoved | Self::ManuallyMoved)
    }
}

/// Observation record for one file inside a watched directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchEntry {
    pub path: PathBuf,
    /// Watched directory this entry belongs to
    pub watch_root: PathBuf,
    pub first_seen_at: DateTime<Utc>,
    pub cooldown_expires_at: DateTime<Utc>,
    /// Last modification time observed on disk
    pub modified_at: DateTime<Utc>,
    pub size: u64,
    /// Filled lazily, needed to recognize the file after a manual move
    pub fingerprint: Option<String>,
    pub state: WatchState,
    /// Last time the classifier declined to auto-organize this file
    pub last_evaluated_at: Option<DateTime<Utc>>,
}
