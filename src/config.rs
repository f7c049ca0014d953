//! Engine configuration
//!
//! Loaded once at startup from a JSON file, then overridden by environment
//! variables (a `.env` file is honoured through dotenvy). Thresholds live in a
//! single named table instead of being scattered through the code.

use crate::error::{Result, SentinelError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Confidence floor for unattended organization. Config may only raise it.
pub const UNATTENDED_MIN_CONFIDENCE: f64 = 0.85;

/// Named auto-organize policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceMode {
    /// Organize everything
    Never,
    Minimal,
    #[default]
    Smart,
    /// Always ask
    Always,
}

impl ConfidenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "NEVER",
            Self::Minimal => "MINIMAL",
            Self::Smart => "SMART",
            Self::Always => "ALWAYS",
        }
    }
}

impl FromStr for ConfidenceMode {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "NEVER" => Ok(Self::Never),
            "MINIMAL" => Ok(Self::Minimal),
            "SMART" => Ok(Self::Smart),
            "ALWAYS" => Ok(Self::Always),
            other => Err(SentinelError::Config(format!(
                "Unknown confidence mode: {}",
                other
            ))),
        }
    }
}

/// `{mode: threshold}` table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ModeThresholds {
    pub never: f64,
    pub minimal: f64,
    pub smart: f64,
    /// Above 1.0 so it can never be reached
    pub always: f64,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            never: 0.0,
            minimal: 0.40,
            smart: 0.70,
            always: 1.01,
        }
    }
}

impl ModeThresholds {
    pub fn threshold(&self, mode: ConfidenceMode) -> f64 {
        match mode {
            ConfidenceMode::Never => self.never,
            ConfidenceMode::Minimal => self.minimal,
            ConfidenceMode::Smart => self.smart,
            ConfidenceMode::Always => self.always,
        }
    }
}

/// Rate limiting and timeouts for vision/audio analyzers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzerConfig {
    /// Rate limit: max concurrent requests
    pub max_concurrent: usize,
    /// Rate limit: requests per second
    pub requests_per_second: f32,
    /// Per-call timeout
    pub timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: num_cpus::get().clamp(2, 8),
            requests_per_second: 5.0,
            timeout_ms: 15_000,
        }
    }
}

impl AnalyzerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LearningConfig {
    /// Classification events below this confidence are not learned from
    pub min_event_confidence: f64,
    /// Count added to the chosen category on a user correction. At
    /// `min_support` one correction is enough to predict.
    pub correction_weight: u64,
    /// Count added for a verified example (manual move)
    pub verified_weight: u64,
    /// Multiplier applied to every count by `decay()`
    pub decay_factor: f64,
    /// Occurrences a pattern needs before it contributes to predictions.
    /// Unconfirmed classifications add at most one per file content.
    pub min_support: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_event_confidence: 0.5,
            correction_weight: 5,
            verified_weight: 5,
            decay_factor: 0.9,
            min_support: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackendKind {
    /// OS change notifications
    #[default]
    Notify,
    /// Periodic directory scans, for filesystems without notifications
    Polling,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchPathConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ObserverConfig {
    pub watch_paths: Vec<WatchPathConfig>,
    pub backend: WatchBackendKind,
    pub poll_interval_ms: u64,
    /// How often cooldowns are re-evaluated
    pub tick_interval_ms: u64,
    /// Clamped to at least [`UNATTENDED_MIN_CONFIDENCE`]
    pub unattended_min_confidence: f64,
    /// Wait before re-classifying an eligible file that was not moved
    pub reevaluate_after_hours: i64,
    /// A departure and an arrival with the same fingerprint within this window
    /// count as one manual move
    pub move_match_window_secs: i64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Upper bound on a single filesystem move issued by the observer
    pub move_timeout_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            watch_paths: Vec::new(),
            backend: WatchBackendKind::Notify,
            poll_interval_ms: 5_000,
            tick_interval_ms: 60_000,
            unattended_min_confidence: UNATTENDED_MIN_CONFIDENCE,
            reevaluate_after_hours: 24,
            move_match_window_secs: 300,
            retry_initial_ms: 500,
            retry_max_ms: 60_000,
            move_timeout_ms: 30_000,
        }
    }
}

impl ObserverConfig {
    pub fn unattended_floor(&self) -> f64 {
        self.unattended_min_confidence.max(UNATTENDED_MIN_CONFIDENCE)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms.max(1))
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms.max(self.retry_initial_ms).max(1))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Database, lock file and pending-move intents live here
    pub data_dir: PathBuf,
    /// Root of the category taxonomy
    pub library_root: PathBuf,
    /// Where dedup cleanup moves duplicates. Defaults to `data_dir/recycle`.
    pub recycle_dir: Option<PathBuf>,
    pub mode: ConfidenceMode,
    pub thresholds: ModeThresholds,
    pub analyzer: AnalyzerConfig,
    pub learning: LearningConfig,
    pub observer: ObserverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sentinel");
        let library_root = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("Sentinel");

        Self {
            data_dir,
            library_root,
            recycle_dir: None,
            mode: ConfidenceMode::default(),
            thresholds: ModeThresholds::default(),
            analyzer: AnalyzerConfig::default(),
            learning: LearningConfig::default(),
            observer: ObserverConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration rooted in a single directory, used by tests and embedders
    pub fn with_root(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            library_root: root.join("library"),
            ..Default::default()
        }
    }

    /// Load from a JSON file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: EngineConfig = serde_json::from_str(&raw)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SENTINEL_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();

        if let Ok(dir) = std::env::var("SENTINEL_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(root) = std::env::var("SENTINEL_LIBRARY_ROOT") {
            self.library_root = PathBuf::from(root);
        }
        if let Ok(mode) = std::env::var("SENTINEL_MODE") {
            self.mode = mode.parse()?;
        }
        if let Ok(ms) = std::env::var("SENTINEL_ANALYZER_TIMEOUT_MS") {
            self.analyzer.timeout_ms = ms.parse().map_err(|_| {
                SentinelError::Config(format!("Invalid SENTINEL_ANALYZER_TIMEOUT_MS: {}", ms))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, value) in [
            ("NEVER", t.never),
            ("MINIMAL", t.minimal),
            ("SMART", t.smart),
            ("ALWAYS", t.always),
        ] {
            if !(0.0..=1.01).contains(&value) {
                return Err(SentinelError::Config(format!(
                    "Threshold {} out of range: {}",
                    name, value
                )));
            }
        }

        if self.analyzer.max_concurrent == 0 {
            return Err(SentinelError::Config(
                "analyzer.maxConcurrent must be at least 1".to_string(),
            ));
        }
        if !(self.analyzer.requests_per_second > 0.0) {
            return Err(SentinelError::Config(
                "analyzer.requestsPerSecond must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learning.decay_factor) {
            return Err(SentinelError::Config(format!(
                "learning.decayFactor out of range: {}",
                self.learning.decay_factor
            )));
        }

        let mut paths = vec![&self.data_dir, &self.library_root];
        if let Some(recycle) = &self.recycle_dir {
            paths.push(recycle);
        }
        paths.extend(self.observer.watch_paths.iter().map(|w| &w.path));
        for path in paths {
            if !path.is_absolute() {
                return Err(SentinelError::Config(format!(
                    "Path must be absolute: {}",
                    path.display()
                )));
            }
        }

        // The library is watched separately; nesting would observe files twice
        for watch in &self.observer.watch_paths {
            if watch.path.starts_with(&self.library_root) || self.library_root.starts_with(&watch.path) {
                return Err(SentinelError::Config(format!(
                    "Watch path {} overlaps the library root {}",
                    watch.path.display(),
                    self.library_root.display()
                )));
            }
        }
        if self.observer.tick_interval_ms == 0 {
            return Err(SentinelError::Config(
                "observer.tickIntervalMs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn recycle_dir(&self) -> PathBuf {
        self.recycle_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("recycle"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sentinel.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("sentinel.lock")
    }

    /// In-flight move intents, see `rollback::pending`
    pub fn pending_dir(&self) -> PathBuf {
        self.data_dir.join("pending")
    }
}
