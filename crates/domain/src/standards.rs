//! Per-device-kind reference tables.
//!
//! Every table is keyed by serial prefix (`TMP0`, `LGT0`, …). Lookups either
//! take the first matching prefix (limits, configuration standards) or every
//! matching prefix (weather thresholds). Keys are visited in sorted order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::bounds::{Bounds, SOURCE_LIMITS};
use crate::device::Device;
use crate::weather::WeatherThreshold;

/// A table of values keyed by serial prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixTable<T>(BTreeMap<String, T>);

impl<T> Default for PrefixTable<T> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T> FromIterator<(String, T)> for PrefixTable<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T> PrefixTable<T> {
    /// Add or replace an entry.
    pub fn insert(&mut self, prefix: impl Into<String>, value: T) {
        self.0.insert(prefix.into(), value);
    }

    /// The entry of the first prefix the serial starts with.
    #[must_use]
    pub fn first_match(&self, serial: &str) -> Option<&T> {
        self.0
            .iter()
            .find(|(prefix, _)| serial.starts_with(prefix.as_str()))
            .map(|(_, v)| v)
    }

    /// Every entry whose prefix the serial starts with.
    pub fn all_matches<'a>(&'a self, serial: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.0
            .iter()
            .filter(move |(prefix, _)| serial.starts_with(prefix.as_str()))
            .map(|(_, v)| v)
    }

    /// Number of prefixes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No prefixes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Static acceptable range of one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricLimit {
    /// Lower limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl MetricLimit {
    /// Bounds tagged `limits`, or `None` when neither side is set.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        (self.min.is_some() || self.max.is_some())
            .then(|| Bounds::new(self.min, self.max, SOURCE_LIMITS))
    }
}

/// Limits of every metric of one device kind.
pub type MetricLimits = BTreeMap<String, MetricLimit>;

/// Declared configuration standard of one device kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigStandard {
    /// Expected `config.modo` (compared case-insensitively; empty disables the check).
    #[serde(rename = "expected_modo", default)]
    pub expected_mode: String,
    /// Smallest acceptable `config.intervalo_envio`.
    #[serde(rename = "intervalo_min_s", default = "default_interval_min")]
    pub interval_min_s: i64,
    /// Largest acceptable `config.intervalo_envio`.
    #[serde(rename = "intervalo_max_s", default = "default_interval_max")]
    pub interval_max_s: i64,
    /// Notification cooldown override.
    #[serde(
        rename = "misconfig_cooldown_s",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cooldown_s: Option<u64>,
}

fn default_interval_min() -> i64 {
    1
}

fn default_interval_max() -> i64 {
    3600
}

/// Outcome of checking a device against its [`ConfigStandard`].
#[derive(Debug, Clone, PartialEq)]
pub struct Misconfiguration {
    /// Human-readable findings.
    pub issues: Vec<String>,
    /// Configuration patch that would fix every finding.
    pub patch: Map<String, Value>,
    /// Severity label.
    pub severity: &'static str,
}

impl ConfigStandard {
    /// Check a device; `None` means compliant.
    #[must_use]
    pub fn evaluate(&self, device: &Device) -> Option<Misconfiguration> {
        let mut issues = Vec::new();
        let mut patch = Map::new();

        let expected = self.expected_mode.trim().to_lowercase();
        let mode = device.mode();
        if !expected.is_empty() && mode != expected {
            let shown = if mode.is_empty() { "N/A" } else { mode.as_str() };
            issues.push(format!("config.modo = '{shown}', expected '{expected}'"));
            patch.insert("modo".to_string(), Value::String(expected));
        }

        let interval = device.send_interval_secs();
        let (min, max) = (self.interval_min_s, self.interval_max_s);
        if interval < min || interval > max {
            issues.push(format!(
                "config.intervalo_envio = {interval} outside [{min}, {max}]"
            ));
            let seed = if interval == 0 { min } else { interval };
            patch.insert(
                "intervalo_envio".to_string(),
                json!(seed.min(max).max(min)),
            );
        }

        if issues.is_empty() {
            return None;
        }
        let mut wrapped = Map::new();
        wrapped.insert("config".to_string(), Value::Object(patch));
        Some(Misconfiguration {
            issues,
            patch: wrapped,
            severity: "low",
        })
    }
}

/// Every reference table the rules consult.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standards {
    /// Static metric limits per kind.
    pub limits: PrefixTable<MetricLimits>,
    /// Configuration standards per kind.
    pub config: PrefixTable<ConfigStandard>,
    /// Weather thresholds per kind.
    pub weather: PrefixTable<Vec<WeatherThreshold>>,
}

impl Default for Standards {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            config: default_config_standards(),
            weather: PrefixTable::default(),
        }
    }
}

fn limit(min: f64, max: f64) -> MetricLimit {
    MetricLimit {
        min: Some(min),
        max: Some(max),
    }
}

/// Built-in metric limits.
#[must_use]
pub fn default_limits() -> PrefixTable<MetricLimits> {
    let entry = |pairs: &[(&str, MetricLimit)]| -> MetricLimits {
        pairs
            .iter()
            .map(|(name, l)| ((*name).to_string(), *l))
            .collect()
    };
    [
        (
            "TMP0",
            entry(&[
                ("temperatura", limit(18.0, 32.0)),
                ("humedad", limit(20.0, 80.0)),
            ]),
        ),
        ("CO20", entry(&[("co2_ppm", limit(350.0, 1200.0))])),
        ("LUX0", entry(&[("luz_lux", limit(0.0, 500.0))])),
        ("SND0", entry(&[("db", limit(30.0, 85.0))])),
        ("PLG0", entry(&[("consumo_w", limit(0.0, 1500.0))])),
        ("FAN0", entry(&[("velocidad", limit(0.0, 3.0))])),
    ]
    .into_iter()
    .map(|(prefix, limits)| (prefix.to_string(), limits))
    .collect()
}

/// Built-in configuration standards.
#[must_use]
pub fn default_config_standards() -> PrefixTable<ConfigStandard> {
    ["LGT0", "RGD0", "SHD0", "FAN0", "PLG0", "MOV0"]
        .into_iter()
        .map(|prefix| {
            (
                prefix.to_string(),
                ConfigStandard {
                    expected_mode: crate::device::MODE_SCHEDULED.to_string(),
                    interval_min_s: 1,
                    interval_max_s: 3600,
                    cooldown_s: Some(3600),
                },
            )
        })
        .collect()
}
