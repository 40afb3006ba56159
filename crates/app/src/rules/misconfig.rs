//! Configuration drift against the per-kind standards.
//!
//! A device moves between compliant and misconfigured. Entering the
//! misconfigured state notifies (subject to the cooldown); staying in it only
//! reminds when `remind` is on; recovering clears the flag silently.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use hubwatch_domain::device::Device;
use hubwatch_domain::error::HubError;
use hubwatch_domain::event::EventKind;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::signal::Signal;
use hubwatch_domain::standards::Misconfiguration;
use hubwatch_domain::time::{Timestamp, elapsed_secs, now};

use super::{BatchRequest, Rule, RuleContext};
use crate::sync::lock;

/// Registry name.
pub const NAME: &str = "misconfig";

/// Tuning of [`MisconfigRule`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MisconfigSettings {
    /// Cooldown used when the standard has none.
    pub cooldown_secs: u64,
    /// Re-notify a device that stays misconfigured.
    pub remind: bool,
}

impl Default for MisconfigSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 3600,
            remind: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DeviceState {
    misconfigured: bool,
    last_notified: Option<Timestamp>,
}

/// Compares device configuration to its standard.
#[derive(Default)]
pub struct MisconfigRule {
    settings: MisconfigSettings,
    states: Mutex<HashMap<DeviceId, DeviceState>>,
}

impl MisconfigRule {
    /// Create the rule.
    #[must_use]
    pub fn new(settings: MisconfigSettings) -> Self {
        Self {
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Run the state machine; returns the finding when it must be notified,
    /// and whether the device is currently misconfigured.
    fn transition(
        &self,
        ctx: &RuleContext,
        device: &Device,
        at: Timestamp,
    ) -> (bool, Option<Misconfiguration>) {
        let Some(standard) = ctx.standards.config.first_match(device.id.as_str()) else {
            return (false, None);
        };
        let cooldown = standard.cooldown_s.unwrap_or(self.settings.cooldown_secs);
        let finding = standard.evaluate(device);

        let mut states = lock(&self.states);
        let state = states.entry(device.id.clone()).or_default();
        let Some(finding) = finding else {
            if state.misconfigured {
                tracing::info!(device_id = %device.id, "configuration back to standard");
            }
            state.misconfigured = false;
            return (false, None);
        };

        let was_misconfigured = state.misconfigured;
        state.misconfigured = true;
        if was_misconfigured && !self.settings.remind {
            return (true, None);
        }
        let cooled = state
            .last_notified
            .is_none_or(|last| elapsed_secs(last, at) >= cooldown);
        if !cooled {
            return (true, None);
        }
        state.last_notified = Some(at);
        (true, Some(finding))
    }

    fn publish(ctx: &RuleContext, device: &Device, finding: Misconfiguration, at: Timestamp) {
        tracing::info!(device_id = %device.id, issues = finding.issues.len(), "misconfiguration detected");
        let event = ctx
            .event(EventKind::Misconfig, NAME, at)
            .for_device(device.id.clone())
            .with("issues", finding.issues)
            .with("suggested_patch", Value::Object(finding.patch))
            .with("severity", finding.severity);
        ctx.publish(event);
    }
}

#[async_trait]
impl Rule for MisconfigRule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn on_measure(
        &self,
        ctx: &RuleContext,
        device: &Device,
        signal: &Signal,
        at: Timestamp,
    ) -> Result<(), HubError> {
        if !device.claimed || !matches!(signal, Signal::Config) {
            return Ok(());
        }
        if let (_, Some(finding)) = self.transition(ctx, device, at) {
            Self::publish(ctx, device, finding, at);
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        ctx: &RuleContext,
        device: &Device,
        _request: &BatchRequest,
    ) -> Result<(), HubError> {
        let at = now();
        if !device.claimed {
            ctx.done(NAME, &device.id, at, json!({"reason": "unclaimed"}));
            return Ok(());
        }
        let (misconfigured, finding) = self.transition(ctx, device, at);
        if let Some(finding) = finding {
            Self::publish(ctx, device, finding, at);
        }
        ctx.done(NAME, &device.id, at, json!({"misconfig": misconfigured}));
        Ok(())
    }
}
