//! Time and timestamp helpers.
//!
//! All instants are stored in UTC. Rules that reason about time of day
//! (schedules, local timestamps in events) go through a [`LocalZone`], a
//! fixed UTC offset configured once at startup.

use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};

use crate::error::ValidationError;

/// UTC timestamp used for sample times, event times, cooldowns, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Format a timestamp as RFC 3339 with second precision and a `Z` suffix.
#[must_use]
pub fn format_utc(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Seconds elapsed from `earlier` to `later`, clamped at zero.
#[must_use]
pub fn elapsed_secs(earlier: Timestamp, later: Timestamp) -> u64 {
    u64::try_from((later - earlier).num_seconds()).unwrap_or(0)
}

/// The zone used for time-of-day features and `ts_local` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalZone(FixedOffset);

/// Default offset: UTC-04:00.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -240;

impl Default for LocalZone {
    fn default() -> Self {
        Self::from_offset_minutes(DEFAULT_UTC_OFFSET_MINUTES).unwrap_or_else(|_| Self::utc())
    }
}

impl LocalZone {
    /// The UTC zone itself.
    #[must_use]
    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    /// Build a zone from an offset east of UTC, in minutes.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidUtcOffset`] when the offset is
    /// 24 hours or more in either direction.
    pub fn from_offset_minutes(minutes: i32) -> Result<Self, ValidationError> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self)
            .ok_or(ValidationError::InvalidUtcOffset(minutes))
    }

    /// Convert a UTC instant into this zone.
    #[must_use]
    pub fn to_local(&self, ts: Timestamp) -> DateTime<FixedOffset> {
        ts.with_timezone(&self.0)
    }

    /// Format a UTC instant as local RFC 3339 (second precision, with offset).
    #[must_use]
    pub fn format_local(&self, ts: Timestamp) -> String {
        self.to_local(ts).to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}
