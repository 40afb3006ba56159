//! Weather snapshots and threshold rules.
//!
//! Snapshots are normalised to a fixed set of canonical field names so that
//! threshold rules do not depend on which provider (or injected payload)
//! produced the data.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::signal::coerce_number;

/// Canonical field names, always present in a [`WeatherSnapshot`].
pub const CANONICAL_FIELDS: [&str; 8] = [
    "temperature",
    "rain",
    "precipitation",
    "windspeed",
    "uv_index",
    "humidity",
    "cloud_cover",
    "shortwave_radiation",
];

/// Provider field names and the canonical name each maps to.
const PROVIDER_FIELDS: [(&str, &str); 8] = [
    ("temperature_2m", "temperature"),
    ("wind_speed_10m", "windspeed"),
    ("uv_index", "uv_index"),
    ("precipitation", "precipitation"),
    ("rain", "rain"),
    ("relative_humidity_2m", "humidity"),
    ("cloud_cover", "cloud_cover"),
    ("shortwave_radiation", "shortwave_radiation"),
];

/// Loose aliases accepted in injected payloads.
const ALIASES: [(&str, &str); 10] = [
    ("temp", "temperature"),
    ("temperature", "temperature"),
    ("wind", "windspeed"),
    ("wind_speed", "windspeed"),
    ("windspeed", "windspeed"),
    ("uv", "uv_index"),
    ("humidity", "humidity"),
    ("clouds", "cloud_cover"),
    ("sw_rad", "shortwave_radiation"),
    ("light", "shortwave_radiation"),
];

/// Fields requested from a provider when none are configured.
pub const DEFAULT_PROVIDER_FIELDS: [&str; 5] = [
    "temperature_2m",
    "wind_speed_10m",
    "uv_index",
    "rain",
    "relative_humidity_2m",
];

/// Provider field name for a canonical field.
#[must_use]
pub fn provider_field(canonical: &str) -> Option<&'static str> {
    PROVIDER_FIELDS
        .iter()
        .find(|(_, canon)| *canon == canonical.trim())
        .map(|(provider, _)| *provider)
}

/// Canonical name of a metric as written in a rule (provider or canonical name).
#[must_use]
pub fn canonical_name(metric: &str) -> &str {
    PROVIDER_FIELDS
        .iter()
        .find(|(provider, _)| *provider == metric)
        .map_or(metric, |(_, canon)| *canon)
}

/// Current conditions keyed by canonical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeatherSnapshot(BTreeMap<String, Option<f64>>);

impl Default for WeatherSnapshot {
    fn default() -> Self {
        Self(
            CANONICAL_FIELDS
                .iter()
                .map(|name| ((*name).to_string(), None))
                .collect(),
        )
    }
}

impl WeatherSnapshot {
    /// Normalise a provider response or an injected payload.
    ///
    /// A nested `current` object is unwrapped. Provider names win over
    /// aliases; unknown keys are dropped.
    #[must_use]
    pub fn from_payload(raw: &Map<String, Value>) -> Self {
        let source = match raw.get("current") {
            Some(Value::Object(current)) => current,
            _ => raw,
        };
        let mut snapshot = Self::default();
        for (provider, canon) in PROVIDER_FIELDS {
            if let Some(value) = source.get(provider).and_then(coerce_number) {
                snapshot.0.insert(canon.to_string(), Some(value));
            }
        }
        for (alias, canon) in ALIASES {
            let unset = snapshot.0.get(canon).is_none_or(Option::is_none);
            if unset && let Some(value) = source.get(alias).and_then(coerce_number) {
                snapshot.0.insert(canon.to_string(), Some(value));
            }
        }
        snapshot
    }

    /// Current value of a metric, accepting provider or canonical names.
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(canonical_name(metric.trim())).copied().flatten()
    }

    /// Whether any field carries a value.
    #[must_use]
    pub fn has_values(&self) -> bool {
        self.0.values().any(Option::is_some)
    }
}

/// Comparison operator of a threshold rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Comparator {
    /// `>`
    #[default]
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl Comparator {
    /// Symbol as written in rule tables.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    /// Evaluate `current <op> threshold`.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn holds(self, current: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => current > threshold,
            Self::Ge => current >= threshold,
            Self::Lt => current < threshold,
            Self::Le => current <= threshold,
            Self::Eq => current == threshold,
            Self::Ne => current != threshold,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            other => Err(ValidationError::UnknownComparator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Comparator {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Comparator> for String {
    fn from(value: Comparator) -> Self {
        value.as_str().to_string()
    }
}

/// What to do when a threshold is crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherAction {
    /// Publish an event only.
    #[default]
    Notify,
    /// Publish, then force the device off in manual mode.
    Shutdown,
}

impl WeatherAction {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::Shutdown => "shutdown",
        }
    }
}

/// One threshold rule attached to a serial prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherThreshold {
    /// Canonical or provider field name.
    pub metric: String,
    /// Comparison operator.
    #[serde(default)]
    pub op: Comparator,
    /// Value compared against.
    pub threshold: f64,
    /// Action on match.
    #[serde(default)]
    pub action: WeatherAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn should_canonicalise_provider_response() {
        let raw = object(json!({
            "current": {"temperature_2m": 31.2, "wind_speed_10m": 12.0, "relative_humidity_2m": 70}
        }));
        let snapshot = WeatherSnapshot::from_payload(&raw);
        assert_eq!(snapshot.get("temperature"), Some(31.2));
        assert_eq!(snapshot.get("temperature_2m"), Some(31.2));
        assert_eq!(snapshot.get("windspeed"), Some(12.0));
        assert_eq!(snapshot.get("humidity"), Some(70.0));
        assert_eq!(snapshot.get("rain"), None);
    }

    #[test]
    fn should_accept_aliases_without_overriding_provider_names() {
        let raw = object(json!({"temp": 10.0, "temperature_2m": 20.0, "uv": 9, "clouds": "80"}));
        let snapshot = WeatherSnapshot::from_payload(&raw);
        assert_eq!(snapshot.get("temperature"), Some(20.0));
        assert_eq!(snapshot.get("uv_index"), Some(9.0));
        assert_eq!(snapshot.get("cloud_cover"), Some(80.0));
    }

    #[test]
    fn should_always_carry_every_canonical_key() {
        let snapshot = WeatherSnapshot::from_payload(&Map::new());
        let json = serde_json::to_value(&snapshot).unwrap();
        for field in CANONICAL_FIELDS {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(!snapshot.has_values());
    }

    #[test]
    fn should_map_canonical_to_provider_field() {
        assert_eq!(provider_field("windspeed"), Some("wind_speed_10m"));
        assert_eq!(provider_field("nonsense"), None);
    }

    #[test]
    fn should_evaluate_comparators() {
        assert!(Comparator::Gt.holds(8.5, 8.0));
        assert!(!Comparator::Gt.holds(8.0, 8.0));
        assert!(Comparator::Ge.holds(8.0, 8.0));
        assert!(Comparator::Lt.holds(1.0, 2.0));
        assert!(Comparator::Le.holds(2.0, 2.0));
        assert!(Comparator::Eq.holds(2.0, 2.0));
        assert!(Comparator::Ne.holds(2.0, 3.0));
    }

    #[test]
    fn should_parse_threshold_with_defaults() {
        let rule: WeatherThreshold =
            serde_json::from_value(json!({"metric": "rain", "threshold": 5})).unwrap();
        assert_eq!(rule.op, Comparator::Gt);
        assert_eq!(rule.action, WeatherAction::Notify);

        let rule: WeatherThreshold = serde_json::from_value(
            json!({"metric": "windspeed", "op": ">=", "threshold": 60, "action": "shutdown"}),
        )
        .unwrap();
        assert_eq!(rule.op, Comparator::Ge);
        assert_eq!(rule.action, WeatherAction::Shutdown);
    }

    #[test]
    fn should_reject_unknown_comparator() {
        let result: Result<WeatherThreshold, _> =
            serde_json::from_value(json!({"metric": "rain", "op": "~", "threshold": 5}));
        assert!(result.is_err());
    }
}
