//! Weather thresholds and weather-triggered shutdown.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use hubwatch_domain::device::Device;
use hubwatch_domain::error::HubError;
use hubwatch_domain::event::EventKind;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::signal::Signal;
use hubwatch_domain::time::{Timestamp, now};
use hubwatch_domain::weather::{WeatherAction, WeatherThreshold, canonical_name};

use super::{BatchRequest, Cooldowns, Rule, RuleContext};

/// Registry name.
pub const NAME: &str = "weather";

/// Whether `shutdown` thresholds act on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// Publish only.
    Notify,
    /// Publish, then force the device off.
    #[default]
    NotifyAndShutdown,
}

/// Tuning of [`WeatherRule`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    /// Minimum delay between two notifications for one (device, metric).
    pub cooldown_secs: u64,
    /// What `shutdown` thresholds do.
    pub action_mode: ActionMode,
    /// Only evaluate serials starting with one of these (empty = all).
    pub only_for_prefixes: Vec<String>,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 900,
            action_mode: ActionMode::default(),
            only_for_prefixes: Vec::new(),
        }
    }
}

/// Compares current weather against per-kind thresholds.
#[derive(Default)]
pub struct WeatherRule {
    settings: WeatherSettings,
    cooldowns: Cooldowns<(DeviceId, String)>,
}

impl WeatherRule {
    /// Create the rule.
    #[must_use]
    pub fn new(settings: WeatherSettings) -> Self {
        Self {
            settings,
            cooldowns: Cooldowns::default(),
        }
    }

    fn applies_to(&self, device: &Device) -> bool {
        device.claimed
            && (self.settings.only_for_prefixes.is_empty()
                || self
                    .settings
                    .only_for_prefixes
                    .iter()
                    .any(|prefix| device.id.has_prefix(prefix)))
    }

    /// Force `device` off in manual mode, in place, so later thresholds of
    /// the same evaluation see the new settings.
    async fn shutdown(ctx: &RuleContext, device: &mut Device, metric: &str, at: Timestamp) -> Result<(), HubError> {
        if !device.force_shutdown() {
            tracing::debug!(device_id = %device.id, "device already off in manual mode");
            return Ok(());
        }
        ctx.devices.update_settings(device).await?;
        tracing::info!(device_id = %device.id, metric, "weather shutdown applied");
        let event = ctx
            .event(EventKind::WeatherAction, NAME, at)
            .for_device(device.id.clone())
            .with("applied", "shutdown_manual_off")
            .with("metric", metric);
        ctx.publish(event);
        Ok(())
    }
}

#[async_trait]
impl Rule for WeatherRule {
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
        if !matches!(signal, Signal::Heartbeat) || !self.applies_to(device) {
            return Ok(());
        }
        let thresholds: Vec<&WeatherThreshold> = ctx
            .standards
            .weather
            .all_matches(device.id.as_str())
            .flatten()
            .collect();
        if thresholds.is_empty() {
            return Ok(());
        }
        let reading = match ctx.weather.current().await {
            Ok(reading) => reading,
            Err(err) => {
                tracing::debug!(%err, device_id = %device.id, "no weather snapshot, skipping");
                return Ok(());
            }
        };

        let mut current = device.clone();
        for threshold in thresholds {
            let Some(value) = reading.snapshot.get(&threshold.metric) else {
                continue;
            };
            if !threshold.op.holds(value, threshold.threshold) {
                continue;
            }
            let metric = canonical_name(threshold.metric.trim()).to_string();
            if !self
                .cooldowns
                .try_acquire((device.id.clone(), metric.clone()), at, self.settings.cooldown_secs)
            {
                continue;
            }
            let event = ctx
                .event(EventKind::Weather, NAME, at)
                .for_device(device.id.clone())
                .with("metric", metric.as_str())
                .with("value", value)
                .with("op", threshold.op.as_str())
                .with("threshold", threshold.threshold)
                .with("action", threshold.action.as_str())
                .with("source", reading.source.as_str());
            ctx.publish(event);

            if threshold.action == WeatherAction::Shutdown
                && self.settings.action_mode == ActionMode::NotifyAndShutdown
            {
                Self::shutdown(ctx, &mut current, &metric, at).await?;
            }
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        ctx: &RuleContext,
        device: &Device,
        _request: &BatchRequest,
    ) -> Result<(), HubError> {
        ctx.done(NAME, &device.id, now(), json!({"found": 0, "reason": "unsupported"}));
        Ok(())
    }
}
