//! Cooldown state machine
//!
//! ```text
//! observing --(7 days without change)--> eligible --(gate + 0.85)--> auto_moved
//!     \                                     |
//!      `--------(left its location)---------+--> manually_moved
//! ```
//!
//! Pure functions over [`WatchEntry`]; the monitor supplies `now`.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};

use crate::models::{cooldown, WatchEntry, WatchState};

/// What the monitor saw on disk for one path
#[derive(Debug, Clone, PartialEq)]
pub struct FileStamp {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Entry for a file seen for the first time
pub fn first_seen(stamp: &FileStamp, watch_root: &Path, now: DateTime<Utc>) -> WatchEntry {
    WatchEntry {
        path: stamp.path.clone(),
        watch_root: watch_root.to_path_buf(),
        first_seen_at: now,
        cooldown_expires_at: now + cooldown(),
        modified_at: stamp.modified_at,
        size: stamp.size,
        fingerprint: None,
        state: WatchState::Observing,
        last_evaluated_at: None,
    }
}

/// Apply a fresh observation. A change in size or modification time restarts
/// the cooldown. Returns true when the file changed.
pub fn observe(entry: &mut WatchEntry, stamp: &FileStamp, now: DateTime<Utc>) -> bool {
    if entry.state.is_terminal() {
        return false;
    }
    if entry.size == stamp.size && entry.modified_at == stamp.modified_at {
        return false;
    }

    entry.size = stamp.size;
    entry.modified_at = stamp.modified_at;
    entry.first_seen_at = now;
    entry.cooldown_expires_at = now + cooldown();
    entry.fingerprint = None;
    entry.state = WatchState::Observing;
    entry.last_evaluated_at = None;
    true
}

/// `observing -> eligible` once the cooldown has fully elapsed
pub fn advance(entry: &mut WatchEntry, now: DateTime<Utc>) -> bool {
    if entry.state == WatchState::Observing && cooldown_elapsed(entry, now) {
        entry.state = WatchState::Eligible;
        return true;
    }
    false
}

fn cooldown_elapsed(entry: &WatchEntry, now: DateTime<Utc>) -> bool {
    // Both bounds: a tampered `cooldown_expires_at` cannot shorten the wait
    now >= entry.cooldown_expires_at && now >= entry.first_seen_at + cooldown()
}

/// Whether the monitor may ask the classifier about this entry now
///
/// Eligible entries that were declined are re-evaluated after `reevaluate_after`.
pub fn due_for_evaluation(entry: &WatchEntry, now: DateTime<Utc>, reevaluate_after: Duration) -> bool {
    if entry.state != WatchState::Eligible || !cooldown_elapsed(entry, now) {
        return false;
    }
    match entry.last_evaluated_at {
        Some(at) => now - at >= reevaluate_after,
        None => true,
    }
}

/// Whether an unattended move may happen. Hard invariant: never before the
/// cooldown, and only with confidence at or above `floor`.
pub fn may_auto_move(entry: &WatchEntry, confidence: f64, floor: f64, now: DateTime<Utc>) -> bool {
    entry.state == WatchState::Eligible && cooldown_elapsed(entry, now) && confidence >= floor
}

pub fn mark_auto_moved(entry: &mut WatchEntry) {
    entry.state = WatchState::AutoMoved;
}

pub fn mark_declined(entry: &mut WatchEntry, now: DateTime<Utc>) {
    entry.last_evaluated_at = Some(now);
}

/// The file left its watched location through an external actor
pub fn mark_manually_moved(entry: &mut WatchEntry) -> bool {
    if entry.state.is_terminal() {
        return false;
    }
    entry.state = WatchState::ManuallyMoved;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UNATTENDED_MIN_CONFIDENCE;

    fn stamp(size: u64, modified_at: DateTime<Utc>) -> FileStamp {
        FileStamp {
            path: PathBuf::from("/watch/file.pdf"),
            size,
            modified_at,
        }
    }

    #[test]
    fn test_new_entry_is_observing() {
        let now = Utc::now();
        let entry = first_seen(&stamp(10, now), Path::new("/watch"), now);
        assert_eq!(entry.state, WatchState::Observing);
        assert_eq!(entry.cooldown_expires_at, now + Duration::days(7));
    }

    #[test]
    fn test_becomes_eligible_after_cooldown() {
        let t0 = Utc::now();
        let mut entry = first_seen(&stamp(10, t0), Path::new("/watch"), t0);

        assert!(!advance(&mut entry, t0 + Duration::days(7) - Duration::seconds(1)));
        assert_eq!(entry.state, WatchState::Observing);

        assert!(advance(&mut entry, t0 + Duration::days(7)));
        assert_eq!(entry.state, WatchState::Eligible);
    }

    #[test]
    fn test_modification_restarts_cooldown() {
        let t0 = Utc::now();
        let mut entry = first_seen(&stamp(10, t0), Path::new("/watch"), t0);
        let t1 = t0 + Duration::days(6);

        assert!(observe(&mut entry, &stamp(11, t1), t1));
        assert_eq!(entry.first_seen_at, t1);
        assert!(!advance(&mut entry, t0 + Duration::days(8)));
        assert!(advance(&mut entry, t1 + Duration::days(7)));

        // An eligible file that is edited goes back to observing
        let t2 = t1 + Duration::days(8);
        assert!(observe(&mut entry, &stamp(12, t2), t2));
        assert_eq!(entry.state, WatchState::Observing);
    }

    #[test]
    fn test_unchanged_observation_is_noop() {
        let t0 = Utc::now();
        let mut entry = first_seen(&stamp(10, t0), Path::new("/watch"), t0);
        assert!(!observe(&mut entry, &stamp(10, t0), t0 + Duration::days(3)));
        assert_eq!(entry.first_seen_at, t0);
    }

    #[test]
    fn test_auto_move_requires_cooldown_and_floor() {
        let t0 = Utc::now();
        let mut entry = first_seen(&stamp(10, t0), Path::new("/watch"), t0);
        let floor = UNATTENDED_MIN_CONFIDENCE;

        // Even a forced eligible state cannot skip the cooldown
        entry.state = WatchState::Eligible;
        assert!(!may_auto_move(&entry, 1.0, floor, t0 + Duration::days(1)));

        let later = t0 + Duration::days(7);
        assert!(!may_auto_move(&entry, 0.84, floor, later));
        assert!(may_auto_move(&entry, 0.85, floor, later));
    }

    #[test]
    fn test_declined_entries_wait_before_reevaluation() {
        let t0 = Utc::now();
        let mut entry = first_seen(&stamp(10, t0), Path::new("/watch"), t0);
        let t1 = t0 + Duration::days(7);
        advance(&mut entry, t1);
        assert!(due_for_evaluation(&entry, t1, Duration::hours(24)));

        mark_declined(&mut entry, t1);
        assert!(!due_for_evaluation(&entry, t1 + Duration::hours(23), Duration::hours(24)));
        assert!(due_for_evaluation(&entry, t1 + Duration::hours(24), Duration::hours(24)));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let t0 = Utc::now();
        let mut entry = first_seen(&stamp(10, t0), Path::new("/watch"), t0);
        assert!(mark_manually_moved(&mut entry));
        assert!(!mark_manually_moved(&mut entry));
        assert!(!observe(&mut entry, &stamp(99, t0), t0));
        assert_eq!(entry.state, WatchState::ManuallyMoved);
    }
}
