//! Pattern store
//!
//! Owns every `(signal_key, category)` pattern and the per-category
//! statistics. There is exactly one owner, which applies changes; readers get
//! an immutable snapshot through a [`PatternReader`] and never block the
//! writer beyond the pointer swap.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{Result, SentinelError};
use crate::models::{CategoryStats, Pattern};
use crate::storage::{queries, Store};

/// Broad keys (extension, MIME type) say less about a category than name tokens
fn key_weight(signal_key: &str) -> f64 {
    if signal_key.starts_with("name:") {
        1.0
    } else {
        0.5
    }
}

/// Immutable view of the store
#[derive(Debug, Clone, Default)]
pub struct PatternSnapshot {
    /// signal_key -> category -> pattern
    patterns: HashMap<String, HashMap<String, Pattern>>,
    stats: HashMap<String, CategoryStats>,
    /// Occurrences a pattern needs before it predicts anything
    min_support: u64,
}

impl PatternSnapshot {
    /// Learned boost per category for a set of signal keys
    ///
    /// Only patterns seen at least `min_support` times take part. Each
    /// contributes `weight * confidence_contribution`; contributions combine
    /// as `1 - Π(1 - c)`, which stays within `[0, 1]` and grows with
    /// agreement.
    pub fn predict(&self, signal_keys: &[String]) -> HashMap<String, f64> {
        let mut miss: HashMap<String, f64> = HashMap::new();

        for key in signal_keys {
            let Some(by_category) = self.patterns.get(key) else {
                continue;
            };
            let weight = key_weight(key);
            for pattern in by_category.values() {
                if pattern.occurrence_count < self.min_support {
                    continue;
                }
                let c = (weight * pattern.confidence_contribution).clamp(0.0, 1.0);
                if c <= 0.0 {
                    continue;
                }
                *miss.entry(pattern.category.clone()).or_insert(1.0) *= 1.0 - c;
            }
        }

        miss.into_iter()
            .map(|(category, m)| (category, (1.0 - m).clamp(0.0, 1.0)))
            .filter(|(_, boost)| *boost > 0.0)
            .collect()
    }

    pub fn pattern(&self, signal_key: &str, category: &str) -> Option<&Pattern> {
        self.patterns.get(signal_key)?.get(category)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values().flat_map(|m| m.values())
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.values().map(|m| m.len()).sum()
    }

    pub fn category_stats(&self, category: &str) -> Option<&CategoryStats> {
        self.stats.get(category)
    }

    /// Every category the store has ever seen, sorted
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.stats.keys().cloned().collect();
        for pattern in self.patterns() {
            if !self.stats.contains_key(&pattern.category) {
                categories.push(pattern.category.clone());
            }
        }
        categories.sort();
        categories.dedup();
        categories
    }
}

/// Cheap, cloneable read handle
#[derive(Clone)]
pub struct PatternReader {
    current: Arc<RwLock<Arc<PatternSnapshot>>>,
}

impl PatternReader {
    pub fn snapshot(&self) -> Arc<PatternSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn predict(&self, signal_keys: &[String]) -> HashMap<String, f64> {
        self.snapshot().predict(signal_keys)
    }
}

/// Per-category counter touched by a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatDelta {
    Classified,
    CorrectedIn,
    CorrectedOut,
    VerifiedExample,
}

/// A batch of changes applied in one transaction
#[derive(Debug, Default)]
pub struct PatternChanges {
    adjustments: Vec<(String, String, i64)>,
    stats: Vec<(String, StatDelta)>,
    reinforced: Option<(String, String)>,
}

impl PatternChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to every `(key, category)` count. Negative deltas only
    /// touch existing patterns and stop at zero.
    pub fn adjust(&mut self, signal_keys: &[String], category: &str, delta: i64) -> &mut Self {
        for key in signal_keys {
            self.adjustments
                .push((key.clone(), category.to_string(), delta));
        }
        self
    }

    pub fn stat(&mut self, category: &str, delta: StatDelta) -> &mut Self {
        self.stats.push((category.to_string(), delta));
        self
    }

    /// Remember that this content has now counted towards `category`
    pub fn mark_reinforced(&mut self, fingerprint: &str, category: &str) -> &mut Self {
        self.reinforced = Some((fingerprint.to_string(), category.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty() && self.stats.is_empty() && self.reinforced.is_none()
    }
}

pub struct PatternStore {
    store: Store,
    working: Arc<PatternSnapshot>,
    published: Arc<RwLock<Arc<PatternSnapshot>>>,
    /// Fingerprints whose unconfirmed classification already counted
    reinforced: HashSet<String>,
    closed: bool,
}

impl PatternStore {
    /// Load every pattern and statistic from the database
    pub fn open(store: Store, min_support: u64) -> Result<Self> {
        let (patterns, stats, reinforced) = store.with_conn(|conn| {
            Ok((
                queries::load_patterns(conn)?,
                queries::load_category_stats(conn)?,
                queries::load_reinforced(conn)?,
            ))
        })?;

        let mut working = PatternSnapshot {
            min_support: min_support.max(1),
            ..PatternSnapshot::default()
        };
        for pattern in patterns {
            working
                .patterns
                .entry(pattern.signal_key.clone())
                .or_default()
                .insert(pattern.category.clone(), pattern);
        }
        for stat in stats {
            working.stats.insert(stat.category.clone(), stat);
        }

        info!(
            patterns = working.pattern_count(),
            categories = working.stats.len(),
            "Pattern store opened"
        );

        let working = Arc::new(working);
        Ok(Self {
            store,
            published: Arc::new(RwLock::new(Arc::clone(&working))),
            working,
            reinforced: reinforced.into_iter().collect(),
            closed: false,
        })
    }

    pub fn reader(&self) -> PatternReader {
        PatternReader {
            current: Arc::clone(&self.published),
        }
    }

    pub fn snapshot(&self) -> Arc<PatternSnapshot> {
        self.reader().snapshot()
    }

    /// Whether this content already counted as an unconfirmed example
    pub fn has_reinforced(&self, fingerprint: &str) -> bool {
        self.reinforced.contains(fingerprint)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SentinelError::Storage("Pattern store is closed".to_string()));
        }
        Ok(())
    }

    /// Apply a batch. Memory changes only after the transaction commits.
    pub fn apply(&mut self, changes: PatternChanges, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut shared = Arc::clone(&self.working);
        let next = Arc::make_mut(&mut shared);
        let mut touched_keys: Vec<String> = Vec::new();

        for (key, category, delta) in changes.adjustments {
            let by_category = next.patterns.entry(key.clone()).or_default();
            match by_category.get_mut(&category) {
                Some(pattern) => {
                    pattern.occurrence_count = if delta >= 0 {
                        pattern.occurrence_count.saturating_add(delta as u64)
                    } else {
                        pattern.occurrence_count.saturating_sub(delta.unsigned_abs())
                    };
                    pattern.updated_at = now;
                }
                None if delta > 0 => {
                    by_category.insert(
                        category.clone(),
                        Pattern {
                            signal_key: key.clone(),
                            category: category.clone(),
                            occurrence_count: delta as u64,
                            confidence_contribution: 0.0,
                            updated_at: now,
                        },
                    );
                }
                None => {}
            }
            if by_category.is_empty() {
                next.patterns.remove(&key);
            } else if !touched_keys.contains(&key) {
                touched_keys.push(key);
            }
        }

        for key in &touched_keys {
            recompute_contributions(next, key);
        }

        let mut touched_stats: Vec<String> = Vec::new();
        for (category, delta) in changes.stats {
            let stats = next
                .stats
                .entry(category.clone())
                .or_insert_with(|| CategoryStats::new(&category, now));
            match delta {
                StatDelta::Classified => stats.classifications += 1,
                StatDelta::CorrectedIn => stats.corrections_in += 1,
                StatDelta::CorrectedOut => stats.corrections_out += 1,
                StatDelta::VerifiedExample => stats.verified_examples += 1,
            }
            stats.last_seen_at = now;
            if !touched_stats.contains(&category) {
                touched_stats.push(category);
            }
        }

        self.store.transaction(|tx| {
            for key in &touched_keys {
                if let Some(by_category) = next.patterns.get(key) {
                    for pattern in by_category.values() {
                        queries::upsert_pattern(tx, pattern)?;
                    }
                }
            }
            for category in &touched_stats {
                if let Some(stats) = next.stats.get(category) {
                    queries::upsert_category_stats(tx, stats)?;
                }
            }
            if let Some((fingerprint, category)) = &changes.reinforced {
                queries::insert_reinforced(tx, fingerprint, category, now)?;
            }
            Ok(())
        })?;

        if let Some((fingerprint, _)) = changes.reinforced {
            self.reinforced.insert(fingerprint);
        }

        debug!(
            keys = touched_keys.len(),
            categories = touched_stats.len(),
            "Pattern changes committed"
        );
        self.commit(shared);
        Ok(())
    }

    /// Multiply every occurrence count by `factor`. Rows are kept.
    pub fn decay(&mut self, factor: f64, now: DateTime<Utc>) -> Result<usize> {
        self.ensure_open()?;
        let factor = factor.clamp(0.0, 1.0);

        let mut shared = Arc::clone(&self.working);
        let next = Arc::make_mut(&mut shared);
        let keys: Vec<String> = next.patterns.keys().cloned().collect();
        for by_category in next.patterns.values_mut() {
            for pattern in by_category.values_mut() {
                pattern.occurrence_count = (pattern.occurrence_count as f64 * factor).floor() as u64;
                pattern.updated_at = now;
            }
        }
        for key in &keys {
            recompute_contributions(next, key);
        }

        let decayed = next.pattern_count();
        self.store.transaction(|tx| {
            for pattern in next.patterns() {
                queries::upsert_pattern(tx, pattern)?;
            }
            Ok(())
        })?;

        info!(patterns = decayed, factor, "Patterns decayed");
        self.commit(shared);
        Ok(decayed)
    }

    /// Refuse further writes. Everything is already durable.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            info!(patterns = self.working.pattern_count(), "Pattern store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Publish `next`. Readers and the writer share the same allocation.
    fn commit(&mut self, next: Arc<PatternSnapshot>) {
        self.working = Arc::clone(&next);
        let mut guard = self.published.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }
}

/// Share of this key's occurrences that went to each category
fn recompute_contributions(snapshot: &mut PatternSnapshot, signal_key: &str) {
    let Some(by_category) = snapshot.patterns.get_mut(signal_key) else {
        return;
    };
    let total: u64 = by_category.values().map(|p| p.occurrence_count).sum();

    for pattern in by_category.values_mut() {
        pattern.confidence_contribution = if total == 0 {
            0.0
        } else {
            pattern.occurrence_count as f64 / total as f64
        };
    }
}
