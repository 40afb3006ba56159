//! Turning masks into `HH:MM` windows.

use serde_json::{Map, Value, json};

use super::{MINUTES_PER_DAY, WEEKDAYS, WeekMask};

/// A half-open `[start, end)` window in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First minute.
    pub start: u32,
    /// Minute after the last one; may be 1440.
    pub end: u32,
}

impl Window {
    /// Length in minutes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Zero-length window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shaping applied after raw extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    /// Shortest run of on bins kept.
    pub min_span_bins: u32,
    /// Windows separated by at most this many bins are merged.
    pub min_gap_bins: u32,
    /// Snap starts down and ends up to this many minutes (ignored when <= 1).
    pub round_to_min: u32,
    /// Keep only the longest windows per day (0 = unlimited).
    pub max_windows_per_day: usize,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            min_span_bins: 1,
            min_gap_bins: 1,
            round_to_min: 30,
            max_windows_per_day: 2,
        }
    }
}

/// Format minutes since midnight as `HH:MM` (1440 renders as `24:00`).
#[must_use]
pub fn format_hhmm(minutes: u32) -> String {
    let minutes = minutes.min(MINUTES_PER_DAY);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Run-length encode the on bins of one day into windows, dropping runs
/// shorter than `min_span_bins`.
#[must_use]
pub fn extract(day: &[bool], bin_minutes: u32, min_span_bins: u32) -> Vec<Window> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < day.len() {
        if !day[i] {
            i += 1;
            continue;
        }
        let mut j = i;
        while j < day.len() && day[j] {
            j += 1;
        }
        if j - i >= min_span_bins as usize {
            let start = u32::try_from(i).unwrap_or(u32::MAX).saturating_mul(bin_minutes);
            let end = u32::try_from(j).unwrap_or(u32::MAX).saturating_mul(bin_minutes);
            out.push(Window {
                start: start.min(MINUTES_PER_DAY),
                end: end.min(MINUTES_PER_DAY),
            });
        }
        i = j;
    }
    out
}

fn merge_within(windows: Vec<Window>, gap: u32) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::with_capacity(windows.len());
    for w in windows {
        match merged.last_mut() {
            Some(prev) if w.start.saturating_sub(prev.end) <= gap => {
                prev.end = prev.end.max(w.end);
            }
            _ => merged.push(w),
        }
    }
    merged
}

/// Merge small gaps, round, re-merge overlaps, and keep the longest windows.
#[must_use]
pub fn postprocess(mut windows: Vec<Window>, bin_minutes: u32, params: &WindowParams) -> Vec<Window> {
    windows.retain(|w| !w.is_empty());
    windows.sort_by_key(|w| w.start);

    let gap = params.min_gap_bins.saturating_mul(bin_minutes);
    let merged = merge_within(windows, gap);

    let mut rounded: Vec<Window> = if params.round_to_min > 1 {
        let step = params.round_to_min;
        merged
            .into_iter()
            .map(|w| Window {
                start: (w.start / step) * step,
                end: w.end.div_ceil(step).saturating_mul(step).min(MINUTES_PER_DAY),
            })
            .filter(|w| !w.is_empty())
            .collect()
    } else {
        merged
    };
    rounded.sort_by_key(|w| w.start);
    let mut fused = merge_within(rounded, 0);

    if params.max_windows_per_day > 0 {
        fused.sort_by(|a, b| b.len().cmp(&a.len()));
        fused.truncate(params.max_windows_per_day);
        fused.sort_by_key(|w| w.start);
    }
    fused
}

/// Render a mask as `{weekday: [{"inicio": "HH:MM", "fin": "HH:MM"}, …]}`.
///
/// Days without windows are omitted.
#[must_use]
pub fn render(mask: &WeekMask, params: &WindowParams) -> Map<String, Value> {
    let mut out = Map::new();
    for weekday in mask.active_days() {
        let raw = extract(mask.day(weekday), mask.bin_minutes(), params.min_span_bins);
        if raw.is_empty() {
            continue;
        }
        let windows: Vec<Value> = postprocess(raw, mask.bin_minutes(), params)
            .into_iter()
            .map(|w| json!({"inicio": format_hhmm(w.start), "fin": format_hhmm(w.end)}))
            .collect();
        out.insert(WEEKDAYS[weekday].to_string(), Value::Array(windows));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(start: u32, end: u32) -> Window {
        Window { start, end }
    }

    #[test]
    fn should_extract_runs_of_minimum_length() {
        let day = [true, true, true, false, false, true, true];
        assert_eq!(extract(&day, 10, 2), vec![w(0, 30), w(50, 70)]);
        assert_eq!(extract(&day, 10, 3), vec![w(0, 30)]);
    }

    #[test]
    fn should_close_window_at_end_of_day() {
        let mut day = vec![false; 48];
        day[46] = true;
        day[47] = true;
        assert_eq!(extract(&day, 30, 1), vec![w(1380, 1440)]);
        assert_eq!(format_hhmm(1440), "24:00");
    }

    #[test]
    fn should_merge_small_gaps() {
        let params = WindowParams {
            min_span_bins: 1,
            min_gap_bins: 1,
            round_to_min: 0,
            max_windows_per_day: 0,
        };
        let out = postprocess(vec![w(60, 120), w(150, 180), w(300, 330)], 30, &params);
        assert_eq!(out, vec![w(60, 180), w(300, 330)]);
    }

    #[test]
    fn should_round_outward_and_fuse_overlaps() {
        let params = WindowParams {
            min_span_bins: 1,
            min_gap_bins: 0,
            round_to_min: 60,
            max_windows_per_day: 0,
        };
        let out = postprocess(vec![w(70, 100), w(130, 150)], 10, &params);
        // 70..100 -> 60..120, 130..150 -> 120..180, then fused
        assert_eq!(out, vec![w(60, 180)]);
    }

    #[test]
    fn should_keep_longest_windows_sorted_by_start() {
        let params = WindowParams {
            min_span_bins: 1,
            min_gap_bins: 0,
            round_to_min: 0,
            max_windows_per_day: 2,
        };
        let out = postprocess(vec![w(0, 30), w(100, 400), w(500, 560)], 10, &params);
        assert_eq!(out, vec![w(100, 400), w(500, 560)]);
    }

    #[test]
    fn should_render_only_active_days() {
        let mask = WeekMask::from_fn(30, |d, b| d == 4 && (16..20).contains(&b)).unwrap();
        let rendered = render(&mask, &WindowParams::default());
        assert_eq!(rendered.len(), 1);
        assert_eq!(
            rendered["viernes"],
            json!([{"inicio": "08:00", "fin": "10:00"}])
        );
    }
}
