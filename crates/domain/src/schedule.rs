//! Weekly on/off schedules.
//!
//! A [`WeekMask`] splits each weekday into fixed-width bins and marks which
//! bins are "on". Masks come from three places: the configured schedule
//! ([`configured`]), the online model ([`model`]) and labelled CSV history
//! ([`csv`]). [`windows`] turns a mask back into `HH:MM` windows.

pub mod configured;
pub mod csv;
pub mod model;
pub mod windows;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Minutes in a day.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Weekday names, Monday first. Used as keys of rendered schedules.
pub const WEEKDAYS: [&str; 7] = [
    "lunes",
    "martes",
    "miercoles",
    "jueves",
    "viernes",
    "sabado",
    "domingo",
];

/// Index (0 = Monday) of a weekday name; case and accents are ignored.
#[must_use]
pub fn weekday_index(name: &str) -> Option<usize> {
    let normalized: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect();
    WEEKDAYS.iter().position(|d| *d == normalized)
}

/// Per-weekday boolean bins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekMask {
    bin_minutes: u32,
    days: Vec<Vec<bool>>,
}

impl WeekMask {
    /// An all-off mask.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidBinWidth`] unless `bin_minutes` is
    /// positive and divides a day.
    pub fn new(bin_minutes: u32) -> Result<Self, ValidationError> {
        if bin_minutes == 0 || MINUTES_PER_DAY % bin_minutes != 0 {
            return Err(ValidationError::InvalidBinWidth(bin_minutes));
        }
        let bins = (MINUTES_PER_DAY / bin_minutes) as usize;
        Ok(Self {
            bin_minutes,
            days: vec![vec![false; bins]; 7],
        })
    }

    /// Build a mask by evaluating `f(weekday, bin)` for every bin.
    ///
    /// # Errors
    ///
    /// Same as [`WeekMask::new`].
    pub fn from_fn(
        bin_minutes: u32,
        mut f: impl FnMut(usize, usize) -> bool,
    ) -> Result<Self, ValidationError> {
        let mut mask = Self::new(bin_minutes)?;
        for (weekday, day) in mask.days.iter_mut().enumerate() {
            for (bin, slot) in day.iter_mut().enumerate() {
                *slot = f(weekday, bin);
            }
        }
        Ok(mask)
    }

    /// Build a mask from per-bin scores.
    ///
    /// With `top_k > 0`, the `k` highest-scoring bins of each day are on
    /// (provided their score is positive); otherwise a bin is on when its
    /// score is strictly above `threshold`.
    ///
    /// # Errors
    ///
    /// Same as [`WeekMask::new`].
    pub fn from_scores(
        bin_minutes: u32,
        scores: &[Vec<f64>],
        threshold: f64,
        top_k: usize,
    ) -> Result<Self, ValidationError> {
        let mut mask = Self::new(bin_minutes)?;
        for (weekday, day_scores) in scores.iter().enumerate().take(7) {
            let day = &mut mask.days[weekday];
            if top_k > 0 {
                let mut order: Vec<usize> = (0..day_scores.len().min(day.len())).collect();
                order.sort_by(|a, b| day_scores[*b].total_cmp(&day_scores[*a]));
                for bin in order.into_iter().take(top_k) {
                    if day_scores[bin] > 0.0 {
                        day[bin] = true;
                    }
                }
            } else {
                for (slot, score) in day.iter_mut().zip(day_scores) {
                    *slot = *score > threshold;
                }
            }
        }
        Ok(mask)
    }

    /// Bin width in minutes.
    #[must_use]
    pub fn bin_minutes(&self) -> u32 {
        self.bin_minutes
    }

    /// Number of bins per day.
    #[must_use]
    pub fn bins_per_day(&self) -> usize {
        self.days.first().map_or(0, Vec::len)
    }

    /// Bins of one weekday (0 = Monday).
    #[must_use]
    pub fn day(&self, weekday: usize) -> &[bool] {
        self.days.get(weekday).map_or(&[], Vec::as_slice)
    }

    /// Switch one bin on or off. Out-of-range indices are ignored.
    pub fn set(&mut self, weekday: usize, bin: usize, on: bool) {
        if let Some(slot) = self.days.get_mut(weekday).and_then(|d| d.get_mut(bin)) {
            *slot = on;
        }
    }

    /// Switch on every bin touched by `[start_min, end_min)` on one weekday.
    pub fn set_range(&mut self, weekday: usize, start_min: u32, end_min: u32) {
        let step = self.bin_minutes;
        let first = (start_min / step) as usize;
        let last = (end_min.div_ceil(step) as usize).min(self.bins_per_day());
        for bin in first..last {
            self.set(weekday, bin, true);
        }
    }

    /// Number of on bins across the week.
    #[must_use]
    pub fn on_bins(&self) -> usize {
        self.days.iter().flatten().filter(|on| **on).count()
    }

    /// No bin is on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_bins() == 0
    }

    /// Weekdays with at least one on bin.
    pub fn active_days(&self) -> impl Iterator<Item = usize> + '_ {
        self.days
            .iter()
            .enumerate()
            .filter(|(_, day)| day.iter().any(|on| *on))
            .map(|(weekday, _)| weekday)
    }

    /// Fraction of disagreeing bins among bins that are on in either mask:
    /// `|A xor B| / |A or B|`, zero when both are empty.
    ///
    /// Days of different length are padded with off bins.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn diff_ratio(&self, other: &Self) -> f64 {
        let mut union = 0usize;
        let mut xor = 0usize;
        for weekday in 0..7 {
            let a = self.day(weekday);
            let b = other.day(weekday);
            for bin in 0..a.len().max(b.len()) {
                let x = a.get(bin).copied().unwrap_or(false);
                let y = b.get(bin).copied().unwrap_or(false);
                if x || y {
                    union += 1;
                }
                if x != y {
                    xor += 1;
                }
            }
        }
        if union == 0 {
            0.0
        } else {
            xor as f64 / union as f64
        }
    }
}
