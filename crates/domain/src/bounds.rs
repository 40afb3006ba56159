//! Value bounds, bound fusion, percentiles and tolerance.
//!
//! A [`Bounds`] is the acceptable range for one metric of one device. Several
//! providers can contribute one each (static limits, historical percentiles);
//! [`Bounds::fuse`] intersects them.

use serde::{Deserialize, Serialize};

/// Source tag for bounds taken from the per-prefix limits table.
pub const SOURCE_LIMITS: &str = "limits";

/// Source tag for bounds derived from historical percentiles.
pub const SOURCE_HISTORY: &str = "hist";

/// Acceptable range for a metric. Either side may be open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower bound, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Which providers contributed, joined with `+`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Bounds {
    /// Build bounds from a single provider.
    #[must_use]
    pub fn new(min: Option<f64>, max: Option<f64>, source: &str) -> Self {
        Self {
            min,
            max,
            source: Some(source.to_string()),
        }
    }

    /// Neither side is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Intersect several bounds: the largest minimum and the smallest maximum.
    ///
    /// Empty inputs are ignored; the result is empty when nothing contributes.
    #[must_use]
    pub fn fuse<'a>(items: impl IntoIterator<Item = &'a Bounds>) -> Bounds {
        let mut out = Bounds::default();
        let mut sources: Vec<&str> = Vec::new();
        for item in items.into_iter().filter(|b| !b.is_empty()) {
            if let Some(min) = item.min {
                out.min = Some(out.min.map_or(min, |cur| cur.max(min)));
            }
            if let Some(max) = item.max {
                out.max = Some(out.max.map_or(max, |cur| cur.min(max)));
            }
            if let Some(source) = item.source.as_deref() {
                sources.push(source);
            }
        }
        if !sources.is_empty() {
            out.source = Some(sources.join("+"));
        }
        out
    }

    /// Width of the range, or zero unless both sides exist and `max > min`.
    #[must_use]
    pub fn span(&self) -> f64 {
        match (self.min, self.max) {
            (Some(min), Some(max)) if max > min => max - min,
            _ => 0.0,
        }
    }

    /// Tolerance band: `max(abs, frac * span)`.
    #[must_use]
    pub fn tolerance(&self, abs: f64, frac: f64) -> f64 {
        abs.max(frac * self.span())
    }

    /// Whether `value` lies strictly outside the range widened by `tol`.
    #[must_use]
    pub fn is_violated_by(&self, value: f64, tol: f64) -> bool {
        let below = self.min.is_some_and(|min| value < min - tol);
        let above = self.max.is_some_and(|max| value > max + tol);
        below || above
    }
}

/// Linear-interpolated percentile of an ascending slice, `p` in `[0, 100]`.
///
/// Returns `None` for an empty slice.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let (first, last) = (sorted.first()?, sorted.last()?);
    if sorted.len() == 1 {
        return Some(*first);
    }
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if hi >= sorted.len() {
        return Some(*last);
    }
    let weight = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

/// Parameters for [`historical_bounds`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryParams {
    /// Minimum number of values required.
    pub min_points: usize,
    /// Lower percentile.
    pub p_low: f64,
    /// Upper percentile.
    pub p_high: f64,
    /// Padding as a fraction of the percentile span.
    pub pad_frac: f64,
    /// Absolute padding floor.
    pub pad_abs: f64,
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self {
            min_points: 150,
            p_low: 1.0,
            p_high: 99.0,
            pad_frac: 0.05,
            pad_abs: 0.0,
        }
    }
}

/// Derive bounds from past values: percentile range padded on both sides.
///
/// Returns `None` when there are fewer than `min_points` values or the
/// padded range is degenerate (`lo >= hi`).
#[must_use]
pub fn historical_bounds(values: &[f64], params: HistoryParams) -> Option<Bounds> {
    if values.len() < params.min_points || values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);

    let lo = percentile(&sorted, params.p_low)?;
    let hi = percentile(&sorted, params.p_high)?;
    let span = hi - lo;
    let pad = if span > 0.0 {
        params.pad_abs.max(span * params.pad_frac)
    } else {
        params.pad_abs
    };
    let (lo, hi) = (lo - pad, hi + pad);
    if lo >= hi {
        return None;
    }
    Some(Bounds::new(Some(lo), Some(hi), SOURCE_HISTORY))
}
