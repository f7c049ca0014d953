//! Manual move detection
//!
//! A file that leaves a watched location is a departure; a new file showing
//! up under the library root is an arrival. A departure and an arrival
//! with the same fingerprint and size inside the match window are one file
//! moved by hand. Watched paths are scanned independently, so either side may
//! be seen first; whichever completes the pair gets the match.

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub path: PathBuf,
    pub fingerprint: String,
    pub size: u64,
    pub departed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub path: PathBuf,
    pub fingerprint: String,
    pub size: u64,
    pub arrived_at: DateTime<Utc>,
    /// Taxonomy path implied by where the file landed
    pub category: Option<String>,
}

/// A completed manual move
#[derive(Debug, Clone, PartialEq)]
pub struct ManualMove {
    pub from: PathBuf,
    pub arrival: Arrival,
}

pub struct MoveTracker {
    departures: Vec<Departure>,
    arrivals: Vec<Arrival>,
    window: Duration,
}

impl MoveTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            departures: Vec::new(),
            arrivals: Vec::new(),
            window,
        }
    }

    /// Record a departure, or complete the move if its arrival was seen first
    pub fn depart(&mut self, departure: Departure) -> Option<ManualMove> {
        self.expire(departure.departed_at);
        match self
            .arrivals
            .iter()
            .rposition(|a| a.size == departure.size && a.fingerprint == departure.fingerprint)
        {
            Some(index) => Some(ManualMove {
                from: departure.path,
                arrival: self.arrivals.remove(index),
            }),
            None => {
                self.departures.push(departure);
                None
            }
        }
    }

    /// Record an arrival, or complete the move if its departure was seen first
    pub fn arrive(&mut self, arrival: Arrival) -> Option<ManualMove> {
        self.expire(arrival.arrived_at);
        match self
            .departures
            .iter()
            .rposition(|d| d.size == arrival.size && d.fingerprint == arrival.fingerprint)
        {
            Some(index) => Some(ManualMove {
                from: self.departures.remove(index).path,
                arrival,
            }),
            None => {
                self.arrivals.push(arrival);
                None
            }
        }
    }

    /// Forget sightings older than the window
    pub fn expire(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.departures.retain(|d| now - d.departed_at <= window);
        self.arrivals.retain(|a| now - a.arrived_at <= window);
    }

    pub fn pending(&self) -> usize {
        self.departures.len() + self.arrivals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departure(fp: &str, at: DateTime<Utc>) -> Departure {
        Departure {
            path: PathBuf::from("/inbox/a.pdf"),
            fingerprint: fp.to_string(),
            size: 10,
            departed_at: at,
        }
    }

    fn arrival(fp: &str, size: u64, at: DateTime<Utc>) -> Arrival {
        Arrival {
            path: PathBuf::from("/library/taxes/a.pdf"),
            fingerprint: fp.to_string(),
            size,
            arrived_at: at,
            category: Some("taxes".to_string()),
        }
    }

    #[test]
    fn test_departure_then_arrival() {
        let now = Utc::now();
        let mut tracker = MoveTracker::new(Duration::seconds(300));
        assert!(tracker.depart(departure("abc", now)).is_none());

        assert!(tracker.arrive(arrival("other", 10, now)).is_none());
        assert!(tracker.arrive(arrival("abc", 11, now)).is_none());
        let matched = tracker
            .arrive(arrival("abc", 10, now + Duration::seconds(5)))
            .unwrap();
        assert_eq!(matched.from, PathBuf::from("/inbox/a.pdf"));
        assert_eq!(matched.arrival.category.as_deref(), Some("taxes"));
    }

    #[test]
    fn test_arrival_then_departure() {
        let now = Utc::now();
        let mut tracker = MoveTracker::new(Duration::seconds(300));
        assert!(tracker.arrive(arrival("abc", 10, now)).is_none());

        let matched = tracker.depart(departure("abc", now)).unwrap();
        assert_eq!(matched.arrival.path, PathBuf::from("/library/taxes/a.pdf"));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_sightings_expire() {
        let now = Utc::now();
        let mut tracker = MoveTracker::new(Duration::seconds(300));
        tracker.depart(departure("abc", now));

        assert!(tracker
            .arrive(arrival("abc", 10, now + Duration::seconds(301)))
            .is_none());
        // Only the late arrival is left
        assert_eq!(tracker.pending(), 1);
    }
}
