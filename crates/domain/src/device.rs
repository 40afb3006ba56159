//! Device: the registry record the rules read.
//!
//! The core never creates or deletes devices; it only reads them and, for
//! the weather shutdown action, writes `config` and `state` back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::id::DeviceId;
use crate::signal::coerce_number;

/// State string written by a forced shutdown.
pub const STATE_INACTIVE: &str = "inactivo";

/// Mode string meaning "follow the configured schedule".
pub const MODE_SCHEDULED: &str = "horario";

/// Mode string meaning "operator controls the switch".
pub const MODE_MANUAL: &str = "manual";

/// A physical device as seen by the rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable serial.
    pub id: DeviceId,
    /// Rules are inert for unclaimed devices.
    pub claimed: bool,
    /// Free-form status (e.g. `activo`, `inactivo`).
    pub state: String,
    /// Latest metric snapshot.
    pub params: Map<String, Value>,
    /// Arbitrary configuration (`modo`, `encendido`, `intervalo_envio`, `horarios`, …).
    pub config: Map<String, Value>,
}

impl Device {
    /// Start building a new [`Device`].
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    /// The configured mode, lower-cased. Empty when unset.
    #[must_use]
    pub fn mode(&self) -> String {
        match self.config.get("modo") {
            Some(Value::String(s)) => s.trim().to_lowercase(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string().to_lowercase(),
        }
    }

    /// Whether the device should currently be on, if that can be derived.
    ///
    /// `config.encendido` wins when it is a boolean; otherwise the state
    /// string is interpreted.
    #[must_use]
    pub fn switch_target(&self) -> Option<bool> {
        if let Some(Value::Bool(on)) = self.config.get("encendido") {
            return Some(*on);
        }
        match self.state.trim().to_lowercase().as_str() {
            "activo" | "on" | "true" | "1" => Some(true),
            "inactivo" | "off" | "false" | "0" => Some(false),
            _ => None,
        }
    }

    /// The configured reporting interval in seconds; missing or non-integer
    /// values read as zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn send_interval_secs(&self) -> i64 {
        self.config
            .get("intervalo_envio")
            .and_then(coerce_number)
            .filter(|v| v.fract() == 0.0)
            .map_or(0, |v| v as i64)
    }

    /// Whether the device is already in manual mode and switched off.
    #[must_use]
    pub fn is_manual_off(&self) -> bool {
        let on = match self.config.get("encendido") {
            Some(Value::Bool(on)) => *on,
            _ => true,
        };
        self.mode() == MODE_MANUAL && !on
    }

    /// Force manual mode, switch off, and mark the state inactive.
    ///
    /// Returns `false` without touching anything when already manual and off.
    pub fn force_shutdown(&mut self) -> bool {
        if self.is_manual_off() {
            return false;
        }
        self.config
            .insert("modo".to_string(), Value::String(MODE_MANUAL.to_string()));
        self.config.insert("encendido".to_string(), Value::Bool(false));
        self.state = STATE_INACTIVE.to_string();
        true
    }
}

/// Builder for [`Device`].
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    serial: Option<String>,
    claimed: bool,
    state: String,
    params: Map<String, Value>,
    config: Map<String, Value>,
}

impl DeviceBuilder {
    /// Set the serial (required).
    #[must_use]
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Set the claimed flag.
    #[must_use]
    pub fn claimed(mut self, claimed: bool) -> Self {
        self.claimed = claimed;
        self
    }

    /// Set the state string.
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    /// Set one parameter value.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set one configuration value.
    #[must_use]
    pub fn config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Build the device.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptySerial`] if no serial (or a blank one)
    /// was provided.
    pub fn build(self) -> Result<Device, ValidationError> {
        let id = DeviceId::new(self.serial.unwrap_or_default())?;
        Ok(Device {
            id,
            claimed: self.claimed,
            state: self.state,
            params: self.params,
            config: self.config,
        })
    }
}
