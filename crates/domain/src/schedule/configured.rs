//! The schedule an operator configured on the device (`config.horarios`).
//!
//! Expected shape: a list of `{"dias": ["lunes", …], "inicio": "HH:MM", "fin": "HH:MM"}`.
//! Entries that do not match are skipped. A range whose end is not after its
//! start wraps past midnight onto the same listed weekdays.

use serde_json::Value;

use super::{MINUTES_PER_DAY, WeekMask, weekday_index};
use crate::error::ValidationError;

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted.
#[must_use]
pub fn parse_hhmm(text: &str) -> Option<u32> {
    let (h, m) = text.trim().split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h == 24 && m == 0 {
        return Some(MINUTES_PER_DAY);
    }
    (h <= 23 && m <= 59).then_some(h * 60 + m)
}

/// Build the mask of a configured schedule.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidBinWidth`] for a bin width that does not
/// divide a day.
pub fn configured_mask(schedule: Option<&Value>, bin_minutes: u32) -> Result<WeekMask, ValidationError> {
    let mut mask = WeekMask::new(bin_minutes)?;
    let Some(Value::Array(entries)) = schedule else {
        return Ok(mask);
    };

    for entry in entries {
        let Some(Value::Array(days)) = entry.get("dias") else {
            continue;
        };
        let start = entry.get("inicio").and_then(Value::as_str).and_then(parse_hhmm);
        let end = entry.get("fin").and_then(Value::as_str).and_then(parse_hhmm);
        let (Some(start), Some(end)) = (start, end) else {
            continue;
        };

        let ranges = if end >= start {
            vec![(start, end)]
        } else {
            vec![(start, MINUTES_PER_DAY), (0, end)]
        };

        for weekday in days.iter().filter_map(Value::as_str).filter_map(weekday_index) {
            for (a, b) in &ranges {
                mask.set_range(weekday, *a, *b);
            }
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_parse_valid_times() {
        assert_eq!(parse_hhmm("08:30"), Some(510));
        assert_eq!(parse_hhmm(" 23:59 "), Some(1439));
        assert_eq!(parse_hhmm("24:00"), Some(1440));
        assert_eq!(parse_hhmm("24:30"), None);
        assert_eq!(parse_hhmm("8h30"), None);
    }

    #[test]
    fn should_mark_configured_bins() {
        let schedule = json!([
            {"dias": ["lunes", "Miércoles"], "inicio": "08:00", "fin": "10:00"}
        ]);
        let mask = configured_mask(Some(&schedule), 30).unwrap();
        assert_eq!(mask.on_bins(), 8);
        assert!(mask.day(0)[16]);
        assert!(mask.day(0)[19]);
        assert!(!mask.day(0)[20]);
        assert!(mask.day(2)[16]);
        assert!(!mask.day(1)[16]);
    }

    #[test]
    fn should_wrap_overnight_range_onto_same_day() {
        let schedule = json!([{"dias": ["viernes"], "inicio": "22:00", "fin": "02:00"}]);
        let mask = configured_mask(Some(&schedule), 60).unwrap();
        let on: Vec<usize> = (0..24).filter(|b| mask.day(4)[*b]).collect();
        assert_eq!(on, vec![0, 1, 22, 23]);
    }

    #[test]
    fn should_skip_malformed_entries() {
        let schedule = json!([
            {"dias": "lunes", "inicio": "08:00", "fin": "10:00"},
            {"dias": ["lunes"], "inicio": "late", "fin": "10:00"},
            {"dias": ["someday"], "inicio": "08:00", "fin": "10:00"},
            "nonsense"
        ]);
        let mask = configured_mask(Some(&schedule), 30).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn should_return_empty_mask_without_schedule() {
        assert!(configured_mask(None, 30).unwrap().is_empty());
        assert!(configured_mask(Some(&json!({})), 30).unwrap().is_empty());
    }
}
