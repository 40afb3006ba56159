//! Rule events: the discrete findings published to stream listeners.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::{DeviceId, EventId};
use crate::time::{LocalZone, Timestamp, format_utc};

/// Kind tag carried by every [`RuleEvent`] (serialized as `event`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A reading fell outside the fused bounds.
    Anomaly,
    /// The configuration drifted from the declared standard.
    Misconfig,
    /// A learned schedule is proposed.
    Suggest,
    /// A device stopped reporting.
    Offline,
    /// A previously offline device reported again.
    BackOnline,
    /// A weather threshold was crossed.
    Weather,
    /// A weather-triggered action was applied.
    WeatherAction,
    /// A batch run was accepted.
    Progress,
    /// A batch run finished.
    Done,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Anomaly,
        Self::Misconfig,
        Self::Suggest,
        Self::Offline,
        Self::BackOnline,
        Self::Weather,
        Self::WeatherAction,
        Self::Progress,
        Self::Done,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anomaly => "anomaly",
            Self::Misconfig => "misconfig",
            Self::Suggest => "suggest",
            Self::Offline => "offline",
            Self::BackOnline => "back_online",
            Self::Weather => "weather",
            Self::WeatherAction => "weather_action",
            Self::Progress => "progress",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// A finding published by a rule.
///
/// Serialized flat: the fixed fields sit next to the rule-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// Kind tag.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Name of the rule that produced the event.
    pub rule: String,
    /// Device the event is about, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    /// Event time, UTC.
    pub ts_utc: String,
    /// Event time in the configured local zone.
    pub ts_local: String,
    /// Rule-specific fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RuleEvent {
    /// Create an event stamped at `at`.
    #[must_use]
    pub fn new(kind: EventKind, rule: impl Into<String>, at: Timestamp, zone: LocalZone) -> Self {
        Self {
            id: EventId::new(),
            kind,
            rule: rule.into(),
            device_id: None,
            ts_utc: format_utc(at),
            ts_local: zone.format_local(at),
            payload: Map::new(),
        }
    }

    /// Attach the device the event is about.
    #[must_use]
    pub fn for_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Add one payload field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Read one payload field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}
