//! # Temporal Types
//!
//! UTC-only timestamps with second-level precision. The ledger records Unix
//! seconds, so conversion to and from `uint256` seconds is lossless for every
//! value this type holds.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A UTC timestamp with second-level precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current UTC time, truncated to seconds.
    pub fn now() -> Self {
        let now = Utc::now();
        Self(Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now))
    }

    /// From a `chrono::DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// From Unix seconds as reported by a block header.
    pub fn from_unix_secs(secs: u64) -> Result<Self, ValidationError> {
        let signed = i64::try_from(secs).map_err(|_| ValidationError::InvalidTimestamp {
            value: secs.to_string(),
            reason: "exceeds i64 seconds".into(),
        })?;
        Utc.timestamp_opt(signed, 0)
            .single()
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidTimestamp {
                value: secs.to_string(),
                reason: "out of chrono range".into(),
            })
    }

    /// Unix seconds. Pre-epoch values clamp to zero.
    pub fn unix_secs(&self) -> u64 {
        u64::try_from(self.0.timestamp()).unwrap_or(0)
    }

    /// Access the underlying `chrono::DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// This timestamp shifted by `secs` (negative moves backwards).
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(secs))
    }

    /// Absolute distance in seconds.
    pub fn abs_diff_secs(&self, other: &Timestamp) -> u64 {
        (self.0.timestamp() - other.0.timestamp()).unsigned_abs()
    }

    /// ISO 8601 with a `Z` suffix.
    pub fn to_canonical_string(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_round_trip() {
        let t = Timestamp::from_unix_secs(1_700_000_000).unwrap();
        assert_eq!(t.unix_secs(), 1_700_000_000);
        assert_eq!(t.to_canonical_string(), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn rejects_unrepresentable_seconds() {
        assert!(Timestamp::from_unix_secs(u64::MAX).is_err());
    }

    #[test]
    fn now_has_no_subseconds() {
        assert_eq!(Timestamp::now().as_datetime().timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn diff_is_symmetric() {
        let a = Timestamp::from_unix_secs(100).unwrap();
        let b = a.plus_secs(-40);
        assert_eq!(a.abs_diff_secs(&b), 40);
        assert_eq!(b.abs_diff_secs(&a), 40);
    }
}
