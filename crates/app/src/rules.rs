//! Rules: the stateful detectors evaluated for every dispatched signal.
//!
//! Every rule implements [`Rule`] and is registered once in a
//! [`RuleRegistry`]. Rules own their state (cooldowns, hysteresis flags,
//! learned models) behind mutexes; everything else they need arrives through
//! the explicit [`RuleContext`] passed to each call.

pub mod anomaly;
pub mod misconfig;
pub mod offline;
pub mod schedule;
pub mod weather;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use hubwatch_domain::device::Device;
use hubwatch_domain::error::{HubError, ValidationError};
use hubwatch_domain::event::{EventKind, RuleEvent};
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::signal::Signal;
use hubwatch_domain::standards::Standards;
use hubwatch_domain::time::{LocalZone, Timestamp, elapsed_secs};

use crate::event_bus::EventBus;
use crate::ports::{DeviceRepository, SampleHistory};
use crate::services::weather_service::WeatherService;
use crate::sync::lock;

/// Everything a rule call may touch besides its own state.
#[derive(Clone)]
pub struct RuleContext {
    /// Device registry.
    pub devices: Arc<dyn DeviceRepository>,
    /// Historical samples.
    pub history: Arc<dyn SampleHistory>,
    /// Where findings go.
    pub bus: EventBus,
    /// Current weather conditions.
    pub weather: Arc<WeatherService>,
    /// Reference tables (limits, configuration standards, weather thresholds).
    pub standards: Arc<Standards>,
    /// Zone used for `ts_local` and time-of-day features.
    pub zone: LocalZone,
}

impl RuleContext {
    /// Start an event stamped in the configured zone.
    #[must_use]
    pub fn event(&self, kind: EventKind, rule: &str, at: Timestamp) -> RuleEvent {
        RuleEvent::new(kind, rule, at, self.zone)
    }

    /// Publish an event on the bus.
    pub fn publish(&self, event: RuleEvent) {
        tracing::debug!(event = %event.kind, rule = %event.rule, "publishing rule event");
        self.bus.publish(event);
    }

    /// Publish a terminal `done` event for a batch run.
    pub fn done(&self, rule: &str, device_id: &DeviceId, at: Timestamp, fields: serde_json::Value) {
        let mut event = self.event(EventKind::Done, rule, at).for_device(device_id.clone());
        if let serde_json::Value::Object(fields) = fields {
            event.payload.extend(fields);
        }
        self.publish(event);
    }
}

/// Parameters of an operator-triggered batch run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchRequest {
    /// Device to audit.
    pub device_id: DeviceId,
    /// Metric to scan, for rules that work per metric.
    #[serde(default)]
    pub metric: Option<String>,
    /// Trailing window, in days, for rules that scan history.
    #[serde(default)]
    pub days: Option<u32>,
}

impl BatchRequest {
    /// A request for one device with no metric or window.
    #[must_use]
    pub fn for_device(device_id: DeviceId) -> Self {
        Self {
            device_id,
            metric: None,
            days: None,
        }
    }
}

/// A detector evaluated for every dispatched signal.
#[async_trait]
pub trait Rule: Send + Sync {
    /// Registry key and the `rule` field of emitted events.
    fn name(&self) -> &'static str;

    /// React to one signal of one device.
    async fn on_measure(
        &self,
        ctx: &RuleContext,
        device: &Device,
        signal: &Signal,
        at: Timestamp,
    ) -> Result<(), HubError>;

    /// Audit a device on demand. Always ends with a `suggest` or `done` event.
    async fn run_batch(
        &self,
        ctx: &RuleContext,
        device: &Device,
        request: &BatchRequest,
    ) -> Result<(), HubError>;
}

/// Insertion-ordered map from rule name to rule.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<(&'static str, Arc<dyn Rule>)>,
}

impl RuleRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, replacing (in place) a rule with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyRuleName`] for a blank name.
    pub fn register(&mut self, rule: Arc<dyn Rule>) -> Result<(), ValidationError> {
        let name = rule.name();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyRuleName);
        }
        match self.rules.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = rule,
            None => self.rules.push((name, rule)),
        }
        Ok(())
    }

    /// Look up a rule by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Rule>> {
        self.rules
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, rule)| rule)
    }

    /// Rules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Arc<dyn Rule>)> {
        self.rules.iter().map(|(name, rule)| (*name, rule))
    }

    /// Registered names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|(name, _)| *name).collect()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// No rule registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Time-based throttle keyed by `K`.
pub(crate) struct Cooldowns<K> {
    last: Mutex<HashMap<K, Timestamp>>,
}

impl<K> Default for Cooldowns<K> {
    fn default() -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash> Cooldowns<K> {
    /// Record `at` and return `true` unless the previous mark for `key` is
    /// younger than `period_secs`.
    pub(crate) fn try_acquire(&self, key: K, at: Timestamp, period_secs: u64) -> bool {
        let mut last = lock(&self.last);
        if let Some(previous) = last.get(&key)
            && elapsed_secs(*previous, at) < period_secs
        {
            return false;
        }
        last.insert(key, at);
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use hubwatch_domain::time::now;

    struct Named(&'static str);

    #[async_trait]
    impl Rule for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn on_measure(
            &self,
            _ctx: &RuleContext,
            _device: &Device,
            _signal: &Signal,
            _at: Timestamp,
        ) -> Result<(), HubError> {
            Ok(())
        }

        async fn run_batch(
            &self,
            _ctx: &RuleContext,
            _device: &Device,
            _request: &BatchRequest,
        ) -> Result<(), HubError> {
            Ok(())
        }
    }

    #[test]
    fn should_keep_registration_order() {
        let mut registry = RuleRegistry::new();
        registry.register(Arc::new(Named("anomaly"))).unwrap();
        registry.register(Arc::new(Named("misconfig"))).unwrap();
        registry.register(Arc::new(Named("weather"))).unwrap();
        assert_eq!(registry.names(), vec!["anomaly", "misconfig", "weather"]);
        assert!(registry.get("misconfig").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn should_replace_rule_with_same_name_in_place() {
        let mut registry = RuleRegistry::new();
        registry.register(Arc::new(Named("anomaly"))).unwrap();
        registry.register(Arc::new(Named("offline"))).unwrap();
        registry.register(Arc::new(Named("anomaly"))).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["anomaly", "offline"]);
    }

    #[test]
    fn should_reject_blank_rule_name() {
        let mut registry = RuleRegistry::new();
        let result = registry.register(Arc::new(Named(" ")));
        assert_eq!(result, Err(ValidationError::EmptyRuleName));
        assert!(registry.is_empty());
    }

    #[test]
    fn should_throttle_within_cooldown() {
        let cooldowns: Cooldowns<&str> = Cooldowns::default();
        let t0 = now();
        assert!(cooldowns.try_acquire("a", t0, 60));
        assert!(!cooldowns.try_acquire("a", t0 + TimeDelta::seconds(59), 60));
        assert!(cooldowns.try_acquire("b", t0 + TimeDelta::seconds(1), 60));
        assert!(cooldowns.try_acquire("a", t0 + TimeDelta::seconds(60), 60));
    }

    #[test]
    fn should_parse_batch_request() {
        let request: BatchRequest =
            serde_json::from_value(serde_json::json!({"device_id": "TMP0001", "metric": "temperatura", "days": 7}))
                .unwrap();
        assert_eq!(request.device_id.as_str(), "TMP0001");
        assert_eq!(request.days, Some(7));
    }
}
