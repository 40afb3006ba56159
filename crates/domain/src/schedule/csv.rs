//! Labelled on/off history in CSV form.
//!
//! The file has a header row with a `timestamp` column and an `encendido`
//! and/or `estado` column. Timestamps are local wall-clock times. Each row
//! votes for its (weekday, bin); the result is the on-fraction per bin.
//!
//! Fields are split on every comma. Quoted fields containing a comma are not
//! supported; such rows no longer match the header width and are skipped.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};

use super::MINUTES_PER_DAY;

fn parse_label(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "activo" | "yes" | "y" => Some(true),
        "0" | "false" | "off" | "inactivo" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    let raw = raw.trim_end_matches('Z');
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn split_row(line: &str) -> Vec<&str> {
    line.split(',').map(|c| c.trim().trim_matches('"')).collect()
}

/// Aggregate CSV rows into per-(weekday, bin) on-fractions.
///
/// Rows whose column count differs from the header, or with an unparseable
/// timestamp or label, are skipped. Bins without
/// rows score zero. Returns `None` when the header has no `timestamp` column
/// or no label column.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn on_fractions(text: &str, bin_minutes: u32) -> Option<Vec<Vec<f64>>> {
    let bin_minutes = bin_minutes.max(1);
    let bins = (MINUTES_PER_DAY / bin_minutes) as usize;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = split_row(lines.next()?.trim_start_matches('\u{feff}'));
    let ts_col = header.iter().position(|h| h.eq_ignore_ascii_case("timestamp"))?;
    let label_cols: Vec<usize> = ["encendido", "estado"]
        .iter()
        .filter_map(|name| header.iter().position(|h| h.eq_ignore_ascii_case(name)))
        .collect();
    if label_cols.is_empty() {
        return None;
    }

    let mut on = vec![vec![0u32; bins]; 7];
    let mut total = vec![vec![0u32; bins]; 7];
    for line in lines {
        let row = split_row(line);
        if row.len() != header.len() {
            continue;
        }
        let Some(at) = row.get(ts_col).and_then(|raw| parse_timestamp(raw)) else {
            continue;
        };
        let label = label_cols
            .iter()
            .filter_map(|col| row.get(*col))
            .filter(|raw| !raw.is_empty())
            .find_map(|raw| parse_label(raw));
        let Some(label) = label else {
            continue;
        };
        let weekday = at.weekday().num_days_from_monday() as usize;
        let minute = at.hour() * 60 + at.minute();
        let bin = ((minute / bin_minutes) as usize).min(bins - 1);
        total[weekday][bin] += 1;
        if label {
            on[weekday][bin] += 1;
        }
    }

    Some(
        on.iter()
            .zip(total.iter())
            .map(|(on_day, total_day)| {
                on_day
                    .iter()
                    .zip(total_day.iter())
                    .map(|(o, t)| if *t == 0 { 0.0 } else { f64::from(*o) / f64::from(*t) })
                    .collect()
            })
            .collect(),
    )
}
