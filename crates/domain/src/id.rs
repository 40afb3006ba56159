//! Typed identifiers.
//!
//! Devices are identified by their stable serial (the first characters encode
//! the device kind, e.g. `TMP0`, `LGT0`). Events carry a random UUID.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Stable serial identifying a device across restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a serial, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptySerial`] if the trimmed serial is empty.
    pub fn new(serial: impl Into<String>) -> Result<Self, ValidationError> {
        let serial = serial.into();
        let trimmed = serial.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySerial);
        }
        if trimmed.len() == serial.len() {
            Ok(Self(serial))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Borrow the serial.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the serial starts with the given kind prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

/// Unique identifier for a published [`RuleEvent`](crate::event::RuleEvent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(uuid::Uuid);

impl Default for EventId {
    fn default() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl EventId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
