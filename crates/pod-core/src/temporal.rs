//! # Temporal Types — UTC-Only Timestamps
//!
//! Defines `Timestamp`, the single time representation used for temp basal
//! windows, history entries, and the last-known-good communication time.
//!
//! The pod reports time in whole seconds and minutes. Sub-second precision
//! would only create mismatches between what the host computed and what the
//! pod will later echo back, so it is truncated at construction.
//!
//! Non-UTC inputs are **rejected** by [`Timestamp::parse()`]: a local offset
//! in a persisted blob means the blob was not written by this stack.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PodError;

/// A UTC-only timestamp, truncated to seconds precision.
///
/// # Construction
///
/// - [`Timestamp::now()`] — current UTC time, truncated.
/// - [`Timestamp::from_utc()`] — from a `DateTime<Utc>`, truncating sub-seconds.
/// - [`Timestamp::from_epoch_secs()`] — from Unix seconds.
/// - [`Timestamp::parse()`] — from an RFC 3339 string with `Z` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The Unix epoch. Used as the start of a cleared temp basal.
    pub const EPOCH: Timestamp = Timestamp(DateTime::<Utc>::UNIX_EPOCH);

    /// Create a timestamp from the current UTC time, truncated to seconds.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// Create a timestamp from a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Create a timestamp from a Unix epoch timestamp (seconds).
    pub fn from_epoch_secs(secs: i64) -> Result<Self, PodError> {
        DateTime::from_timestamp(secs, 0)
            .map(Self)
            .ok_or_else(|| PodError::Timestamp(format!("unix seconds out of range: {secs}")))
    }

    /// Parse an RFC 3339 timestamp. Only the `Z` suffix is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`PodError::Timestamp`] if the string is not valid RFC 3339
    /// or carries an explicit offset (even `+00:00`).
    pub fn parse(s: &str) -> Result<Self, PodError> {
        if !s.ends_with('Z') {
            return Err(PodError::Timestamp(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| PodError::Timestamp(format!("invalid RFC 3339 timestamp {s:?}: {e}")))?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Unix epoch timestamp in seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// This instant shifted forward by `minutes`. Saturates at the maximum
    /// representable time instead of overflowing.
    pub fn plus_minutes(&self, minutes: u32) -> Self {
        self.plus_secs(i64::from(minutes) * 60)
    }

    /// This instant shifted by `secs` seconds, saturating at either end of
    /// the representable range.
    pub fn plus_secs(&self, secs: i64) -> Self {
        let shifted = Duration::try_seconds(secs)
            .and_then(|d| self.0.checked_add_signed(d))
            .unwrap_or(if secs < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        Self(truncate_to_seconds(shifted))
    }

    /// Whole minutes from `self` until `later`, or 0 if `later` is not after `self`.
    pub fn minutes_until(&self, later: Timestamp) -> u32 {
        let secs = later.epoch_secs() - self.epoch_secs();
        if secs <= 0 {
            return 0;
        }
        u32::try_from(secs / 60).unwrap_or(u32::MAX)
    }

    /// Render as ISO8601 with Z suffix (e.g., `2026-01-15T12:00:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}
