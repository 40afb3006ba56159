//! Timestamp column encoding.
//!
//! Times are stored as fixed-width RFC 3339 UTC strings so that range
//! queries can compare them as text.

use chrono::{DateTime, SecondsFormat};

use hubwatch_domain::time::Timestamp;

pub(crate) fn encode(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode(raw: &str) -> Result<Timestamp, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.to_utc())
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn should_sort_encoded_times_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 5, 6, 9, 59, 59).unwrap();
        let b = a + chrono::TimeDelta::milliseconds(1500);
        assert!(encode(a) < encode(b));
        assert_eq!(decode(&encode(b)).unwrap(), b);
    }
}
