//! Adaptive pattern learning
//!
//! - `patterns`: the store of `(signal_key, category)` patterns and category
//!   statistics, with snapshot reads
//! - `learner`: the single writer fed by classification events and corrections

pub mod learner;
pub mod patterns;

pub use learner::{Learner, LearnerHandle};
pub use patterns::{PatternChanges, PatternReader, PatternSnapshot, PatternStore, StatDelta};
