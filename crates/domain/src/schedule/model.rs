//! Online model of a device's on/off behaviour by time of day.
//!
//! A logistic regression over one-hot hour, one-hot weekday, a weekend flag
//! and the minute within the hour, trained one observation at a time with
//! plain SGD. The model is small enough to persist as JSON.

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

use super::WeekMask;
use crate::error::ValidationError;

/// Serialized format version.
pub const MODEL_VERSION: u32 = 1;

/// Default SGD learning rate.
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;

const HOURS: usize = 24;
const DAYS: usize = 7;
const WEEKEND_IDX: usize = HOURS + DAYS;
const MINUTE_IDX: usize = WEEKEND_IDX + 1;

/// Length of the feature vector.
pub const FEATURE_COUNT: usize = MINUTE_IDX + 1;

/// Time-of-day features of one instant, in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFeatures {
    /// Hour, 0..=23.
    pub hour: u32,
    /// Minute, 0..=59.
    pub minute: u32,
    /// Weekday, 0 = Monday.
    pub weekday: usize,
}

impl TimeFeatures {
    /// Features of a local instant.
    #[must_use]
    pub fn from_local(at: DateTime<FixedOffset>) -> Self {
        Self {
            hour: at.hour(),
            minute: at.minute(),
            weekday: at.weekday().num_days_from_monday() as usize,
        }
    }

    /// Features at the midpoint of a bin.
    #[must_use]
    pub fn bin_midpoint(weekday: usize, bin: usize, bin_minutes: u32) -> Self {
        let start = u32::try_from(bin).unwrap_or(0).saturating_mul(bin_minutes);
        let mid = (start + bin_minutes / 2).min(24 * 60 - 1);
        Self {
            hour: mid / 60,
            minute: mid % 60,
            weekday,
        }
    }

    /// Saturday or Sunday.
    #[must_use]
    pub fn is_weekend(&self) -> bool {
        self.weekday >= 5
    }

    fn vector(&self) -> [f64; FEATURE_COUNT] {
        let mut x = [0.0; FEATURE_COUNT];
        x[(self.hour as usize).min(HOURS - 1)] = 1.0;
        x[HOURS + self.weekday.min(DAYS - 1)] = 1.0;
        if self.is_weekend() {
            x[WEEKEND_IDX] = 1.0;
        }
        x[MINUTE_IDX] = f64::from(self.minute.min(59)) / 59.0;
        x
    }
}

/// Logistic-regression classifier predicting "on" probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleModel {
    version: u32,
    learning_rate: f64,
    weights: Vec<f64>,
    bias: f64,
    updates: u64,
}

impl Default for ScheduleModel {
    fn default() -> Self {
        Self::new(DEFAULT_LEARNING_RATE)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl ScheduleModel {
    /// A fresh, untrained model.
    #[must_use]
    pub fn new(learning_rate: f64) -> Self {
        Self {
            version: MODEL_VERSION,
            learning_rate,
            weights: vec![0.0; FEATURE_COUNT],
            bias: 0.0,
            updates: 0,
        }
    }

    /// Whether a deserialized model matches the current layout.
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.version == MODEL_VERSION && self.weights.len() == FEATURE_COUNT
    }

    /// Number of observations learned so far.
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Probability that the device is on at the given time.
    #[must_use]
    pub fn predict(&self, features: &TimeFeatures) -> f64 {
        let x = features.vector();
        let z = self
            .weights
            .iter()
            .zip(x.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }

    /// One SGD step on a single observation.
    pub fn learn(&mut self, features: &TimeFeatures, on: bool) {
        let x = features.vector();
        let target = if on { 1.0 } else { 0.0 };
        let error = self.predict(features) - target;
        for (w, v) in self.weights.iter_mut().zip(x.iter()) {
            *w -= self.learning_rate * error * v;
        }
        self.bias -= self.learning_rate * error;
        self.updates += 1;
    }

    /// Predicted "on" probability for every bin of the week.
    #[must_use]
    pub fn scores(&self, bin_minutes: u32) -> Vec<Vec<f64>> {
        let bins = (24 * 60 / bin_minutes.max(1)) as usize;
        (0..DAYS)
            .map(|weekday| {
                (0..bins)
                    .map(|bin| self.predict(&TimeFeatures::bin_midpoint(weekday, bin, bin_minutes)))
                    .collect()
            })
            .collect()
    }

    /// Mask of bins whose midpoint probability is strictly above `threshold`
    /// (or the top `k` per day when `top_k > 0`).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidBinWidth`] for a bin width that does
    /// not divide a day.
    pub fn mask(&self, bin_minutes: u32, threshold: f64, top_k: usize) -> Result<WeekMask, ValidationError> {
        WeekMask::from_scores(bin_minutes, &self.scores(bin_minutes), threshold, top_k)
    }
}
