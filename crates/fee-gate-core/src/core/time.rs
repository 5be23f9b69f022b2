// crates/fee-gate-core/src/core/time.rs
// ============================================================================
// Module: Fee Gate Time Model
// Description: Canonical timestamp representation for tenant lifecycle data.
// Purpose: Keep entitlement math explicit about "now" and free of wall-clock reads.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Tenant lifecycle decisions (days remaining, notification debounce, plan end
//! dates) are pure functions of a stored timestamp and a caller-supplied
//! `now`. The runtime never reads the wall clock on its own; hosts call
//! [`Timestamp::now`] once per request and pass it down.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Milliseconds in one day.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// UTC timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Values are explicitly provided by callers; lifecycle math never reads the clock.
/// - Arithmetic saturates instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Reads the current UTC wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_offset_datetime(OffsetDateTime::now_utc())
    }

    /// Converts an [`OffsetDateTime`] into a millisecond timestamp.
    #[must_use]
    pub fn from_offset_datetime(value: OffsetDateTime) -> Self {
        let millis = value.unix_timestamp_nanos() / 1_000_000;
        Self(i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX }))
    }

    /// Returns the timestamp shifted by a signed number of whole days.
    #[must_use]
    pub const fn plus_days(self, days: i64) -> Self {
        Self(self.0.saturating_add(days.saturating_mul(MILLIS_PER_DAY)))
    }

    /// Returns the whole days from `self` until `later`, rounded toward
    /// negative infinity (a deadline 1ms in the past yields -1).
    #[must_use]
    pub const fn whole_days_until(self, later: Self) -> i64 {
        later.0.saturating_sub(self.0).div_euclid(MILLIS_PER_DAY)
    }

    /// Formats the timestamp as RFC 3339 for operator output.
    ///
    /// Falls back to the raw millisecond value when the timestamp is outside
    /// the representable calendar range.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        let nanos = i128::from(self.0) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .and_then(|value| value.format(&Rfc3339).ok())
            .unwrap_or_else(|| format!("{}ms", self.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::MILLIS_PER_DAY;
    use super::Timestamp;

    #[test]
    fn whole_days_until_floors_partial_days() {
        let now = Timestamp::from_unix_millis(1_000_000);
        assert_eq!(now.whole_days_until(now.plus_days(3)), 3);
        let almost_three = Timestamp::from_unix_millis(now.plus_days(3).as_unix_millis() - 1);
        assert_eq!(now.whole_days_until(almost_three), 2);
        let past = Timestamp::from_unix_millis(now.as_unix_millis() - 1);
        assert_eq!(now.whole_days_until(past), -1);
    }

    #[test]
    fn plus_days_saturates() {
        let max = Timestamp::from_unix_millis(i64::MAX - MILLIS_PER_DAY / 2);
        assert_eq!(max.plus_days(1).as_unix_millis(), i64::MAX);
    }

    #[test]
    fn rfc3339_formats_epoch() {
        assert_eq!(Timestamp::from_unix_millis(0).to_rfc3339(), "1970-01-01T00:00:00Z");
    }
}
