//! What a single dispatch carries to the rules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of input handed to every registered rule.
///
/// A telemetry snapshot expands into one [`Signal::Metric`] per field,
/// followed by one [`Signal::Heartbeat`] and one [`Signal::Config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// A named metric reading.
    Metric {
        /// Field name as reported by the device (e.g. `temperatura`).
        name: String,
        /// Raw value; only numeric values are evaluated against bounds.
        value: Value,
    },
    /// Liveness marker emitted once per snapshot.
    Heartbeat,
    /// Configuration or state change; carries no metric.
    Config,
}

impl Signal {
    /// Build a metric signal.
    #[must_use]
    pub fn metric(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Metric {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Expand a parameter snapshot into the full signal sequence: every field
    /// in order, then a heartbeat, then a configuration signal.
    #[must_use]
    pub fn expand(params: &Map<String, Value>) -> Vec<Self> {
        let mut out: Vec<Self> = params
            .iter()
            .map(|(name, value)| Self::metric(name.clone(), value.clone()))
            .collect();
        out.push(Self::Heartbeat);
        out.push(Self::Config);
        out
    }

    /// The metric name and numeric value, if this is a numeric reading.
    #[must_use]
    pub fn numeric(&self) -> Option<(&str, f64)> {
        match self {
            Self::Metric { name, value } => numeric_value(value).map(|v| (name.as_str(), v)),
            _ => None,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Metric { name, .. } => name,
            Self::Heartbeat => "__heartbeat__",
            Self::Config => "__state__",
        }
    }
}

/// Interpret a JSON value as a number.
///
/// Only JSON numbers convert; numeric strings, booleans, nulls and
/// structures do not.
#[must_use]
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Like [`numeric_value`], but also parses numeric strings.
///
/// Used for configuration values and external payloads, never for readings.
#[must_use]
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        other => numeric_value(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_expand_snapshot_with_heartbeat_then_config_last() {
        let params = json!({"temperatura": 21.5, "humedad": 40})
            .as_object()
            .cloned()
            .unwrap();
        let signals = Signal::expand(&params);
        assert_eq!(signals.len(), 4);
        assert_eq!(signals[2], Signal::Heartbeat);
        assert_eq!(signals[3], Signal::Config);
    }

    #[test]
    fn should_extract_numeric_reading() {
        let signal = Signal::metric("temperatura", 45.0);
        assert_eq!(signal.numeric(), Some(("temperatura", 45.0)));
    }

    #[test]
    fn should_reject_numeric_strings() {
        let signal = Signal::metric("db", "61.5");
        assert_eq!(signal.numeric(), None);
    }

    #[test]
    fn should_coerce_numeric_strings_outside_readings() {
        assert_eq!(coerce_number(&Value::from(" 61.5 ")), Some(61.5));
        assert_eq!(coerce_number(&Value::from(7)), Some(7.0));
        assert_eq!(coerce_number(&Value::from("abc")), None);
        assert_eq!(coerce_number(&Value::Bool(true)), None);
    }

    #[test]
    fn should_ignore_booleans_and_non_metric_signals() {
        assert_eq!(Signal::metric("encendido", true).numeric(), None);
        assert_eq!(Signal::Heartbeat.numeric(), None);
        assert_eq!(Signal::Config.numeric(), None);
    }
}
