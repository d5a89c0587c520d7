//! # Temporary Basal Tracking
//!
//! A pod runs at most one temp basal at a time; starting a new one cancels
//! the previous one on the device. The tracker mirrors that: [`start`]
//! replaces whatever is there, [`clear`] resets to the canonical "none"
//! value, and neither ever fails.
//!
//! The tracker has no timer. Expiry is a pure function of the clock the
//! caller passes in; the session coordinator polls it.
//!
//! [`start`]: TempBasalTracker::start
//! [`clear`]: TempBasalTracker::clear

use serde::{Deserialize, Serialize};

use pod_core::{InsulinRate, Timestamp};

/// A temp basal window: rate, start, and duration. End is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBasalPair {
    /// Delivery rate while the temp basal runs.
    pub rate: InsulinRate,
    /// When it started.
    pub start: Timestamp,
    /// Length in minutes.
    pub duration_minutes: u32,
}

impl TempBasalPair {
    /// The canonical "no temp basal" value: zero rate, zero duration.
    pub fn none() -> Self {
        Self {
            rate: InsulinRate::ZERO,
            start: Timestamp::EPOCH,
            duration_minutes: 0,
        }
    }

    /// Whether this is the "no temp basal" value.
    pub fn is_none(&self) -> bool {
        self.rate.is_zero() && self.duration_minutes == 0
    }

    /// When the window ends. Never earlier than `start`.
    pub fn end(&self) -> Timestamp {
        self.start.plus_minutes(self.duration_minutes)
    }
}

impl Default for TempBasalPair {
    fn default() -> Self {
        Self::none()
    }
}

/// Owner of the currently running temp basal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBasalTracker {
    current: TempBasalPair,
    /// When the tracker last changed. `None` until the first start/clear.
    updated_at: Option<Timestamp>,
}

impl TempBasalTracker {
    /// A tracker with no temp basal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted pair.
    pub fn restore(current: TempBasalPair) -> Self {
        Self {
            current,
            updated_at: None,
        }
    }

    /// Start a temp basal, replacing any existing one outright.
    pub fn start(&mut self, rate: InsulinRate, duration_minutes: u32, now: Timestamp) {
        self.current = TempBasalPair {
            rate,
            start: now,
            duration_minutes,
        };
        self.updated_at = Some(now);
    }

    /// Reset to "no temp basal". Idempotent.
    pub fn clear(&mut self, now: Timestamp) {
        if self.current.is_none() {
            return;
        }
        self.current = TempBasalPair::none();
        self.updated_at = Some(now);
    }

    /// Whether the window has ended (`now >= end`). A cleared tracker is
    /// always expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.current.end()
    }

    /// The stored pair, whether or not it has expired.
    pub fn current(&self) -> TempBasalPair {
        self.current
    }

    /// The pair if one is set and still running at `now`.
    pub fn active_at(&self, now: Timestamp) -> Option<TempBasalPair> {
        if self.current.is_none() || self.is_expired(now) {
            None
        } else {
            Some(self.current)
        }
    }

    /// Minutes left at `now`; 0 when nothing is running.
    pub fn remaining_minutes(&self, now: Timestamp) -> u32 {
        self.active_at(now)
            .map(|pair| now.minutes_until(pair.end()))
            .unwrap_or(0)
    }

    /// When the tracker last changed.
    pub fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn rate(uph: f64) -> InsulinRate {
        InsulinRate::from_units_per_hour(uph).unwrap()
    }

    #[test]
    fn test_new_tracker_has_none() {
        let tracker = TempBasalTracker::new();
        assert!(tracker.current().is_none());
        assert!(tracker.is_expired(at("2026-03-01T08:00:00Z")));
        assert_eq!(tracker.active_at(at("2026-03-01T08:00:00Z")), None);
    }

    #[test]
    fn test_start_sets_window() {
        let mut tracker = TempBasalTracker::new();
        let t0 = at("2026-03-01T08:00:00Z");
        tracker.start(rate(1.5), 30, t0);
        let pair = tracker.current();
        assert_eq!(pair.rate, rate(1.5));
        assert_eq!(pair.end(), at("2026-03-01T08:30:00Z"));
        assert!(!tracker.is_expired(at("2026-03-01T08:29:59Z")));
        assert!(tracker.is_expired(at("2026-03-01T08:30:00Z")));
        assert_eq!(tracker.remaining_minutes(at("2026-03-01T08:10:00Z")), 20);
    }

    #[test]
    fn test_start_replaces_prior() {
        let mut tracker = TempBasalTracker::new();
        tracker.start(rate(0.5), 120, at("2026-03-01T08:00:00Z"));
        tracker.start(rate(2.0), 30, at("2026-03-01T08:05:00Z"));
        let pair = tracker.current();
        assert_eq!(pair.rate, rate(2.0));
        assert_eq!(pair.duration_minutes, 30);
        assert_eq!(pair.start, at("2026-03-01T08:05:00Z"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut tracker = TempBasalTracker::new();
        tracker.start(rate(1.0), 60, at("2026-03-01T08:00:00Z"));
        tracker.clear(at("2026-03-01T08:10:00Z"));
        let once = tracker.clone();
        tracker.clear(at("2026-03-01T08:20:00Z"));
        assert_eq!(tracker, once);
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_zero_rate_with_duration_is_a_real_temp_basal() {
        let mut tracker = TempBasalTracker::new();
        tracker.start(InsulinRate::ZERO, 60, at("2026-03-01T08:00:00Z"));
        assert!(!tracker.current().is_none());
        assert!(tracker.active_at(at("2026-03-01T08:30:00Z")).is_some());
    }

    #[test]
    fn test_serialization() {
        let mut tracker = TempBasalTracker::new();
        tracker.start(rate(0.75), 90, at("2026-03-01T08:00:00Z"));
        let json = serde_json::to_string(&tracker).unwrap();
        let parsed: TempBasalTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tracker);
    }

    proptest! {
        #[test]
        fn prop_end_never_before_start(start in 0i64..4_000_000_000, minutes in 0u32..100_000) {
            let pair = TempBasalPair {
                rate: InsulinRate::ZERO,
                start: Timestamp::from_epoch_secs(start).unwrap(),
                duration_minutes: minutes,
            };
            prop_assert!(pair.end() >= pair.start);
        }

        #[test]
        fn prop_second_start_wins(
            r1 in 0u32..3000, d1 in 1u32..720, r2 in 0u32..3000, d2 in 1u32..720, gap in 0i64..3600
        ) {
            let t0 = Timestamp::from_epoch_secs(1_770_000_000).unwrap();
            let t1 = t0.plus_secs(gap);
            let mut tracker = TempBasalTracker::new();
            tracker.start(InsulinRate::from_hundredths(r1), d1, t0);
            tracker.start(InsulinRate::from_hundredths(r2), d2, t1);
            let pair = tracker.current();
            prop_assert_eq!(pair.rate, InsulinRate::from_hundredths(r2));
            prop_assert_eq!(pair.duration_minutes, d2);
            prop_assert_eq!(pair.start, t1);
        }
    }
}
