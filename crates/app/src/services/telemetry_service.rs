//! Telemetry service: records a device snapshot, then hands it to the rules.

use serde::Deserialize;
use serde_json::{Map, Value};

use hubwatch_domain::device::Device;
use hubwatch_domain::error::HubError;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::sample::HistoricalSample;
use hubwatch_domain::signal::Signal;
use hubwatch_domain::time::{Timestamp, now};

use crate::error::EngineError;
use crate::services::rule_engine::RuleEngine;

/// One snapshot reported by (or on behalf of) a device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryReport {
    /// Reporting device.
    pub device_id: DeviceId,
    /// Metric readings.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Configuration keys to merge into the stored configuration.
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    /// New state string.
    #[serde(default)]
    pub state: Option<String>,
    /// New claimed flag.
    #[serde(default)]
    pub claimed: Option<bool>,
    /// Reading time; defaults to reception time.
    #[serde(default)]
    pub recorded_at: Option<Timestamp>,
}

/// Application service for telemetry intake.
#[derive(Clone)]
pub struct TelemetryService {
    engine: RuleEngine,
}

impl TelemetryService {
    /// Create a service dispatching through `engine`.
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }

    /// Store the snapshot on the device record, append it to the history and
    /// dispatch every field, a heartbeat and a configuration signal.
    ///
    /// A record created concurrently by another writer is re-read and the
    /// update retried once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Hub`] when storage fails (including a second
    /// conflict) and [`EngineError::Dispatch`] when the dispatcher is not
    /// running.
    #[tracing::instrument(skip(self, report), fields(device_id = %report.device_id))]
    pub async fn ingest(&self, report: TelemetryReport) -> Result<Device, EngineError> {
        let at = report.recorded_at.unwrap_or_else(now);
        let device = match self.store(&report).await {
            Err(err) if err.is_conflict() => {
                tracing::debug!("device created concurrently, retrying");
                self.store(&report).await?
            }
            other => other?,
        };

        if !report.params.is_empty() {
            let sample = HistoricalSample::new(device.id.clone(), at, report.params.clone());
            self.engine.context().history.append(sample).await?;
        }

        for signal in Signal::expand(&report.params) {
            self.engine.dispatch(&device, &signal, at)?;
        }
        Ok(device)
    }

    async fn store(&self, report: &TelemetryReport) -> Result<Device, HubError> {
        let devices = &self.engine.context().devices;
        let mut device = match devices.get(&report.device_id).await? {
            Some(device) => device,
            None => Device::builder()
                .serial(report.device_id.as_str())
                .build()?,
        };
        device
            .params
            .extend(report.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(config) = &report.config {
            device
                .config
                .extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(state) = &report.state {
            device.state.clone_from(state);
        }
        if let Some(claimed) = report.claimed {
            device.claimed = claimed;
        }
        devices.upsert(device).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use hubwatch_domain::error::ConflictError;
    use hubwatch_domain::event::EventKind;
    use serde_json::json;

    use crate::dispatcher::Dispatcher;
    use crate::ports::DeviceRepository;
    use crate::rules::anomaly::AnomalyRule;
    use crate::rules::testing::{Harness, InMemoryDevices};
    use crate::rules::{RuleContext, RuleRegistry};

    fn service(ctx: RuleContext) -> TelemetryService {
        let mut registry = RuleRegistry::new();
        registry.register(Arc::new(AnomalyRule::default())).unwrap();
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.start(1);
        TelemetryService::new(RuleEngine::new(registry, dispatcher, ctx))
    }

    fn report(value: Value) -> TelemetryReport {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn should_create_device_record_history_and_dispatch() {
        let harness = Harness::new([]);
        let mut sub = harness.subscribe();
        let service = service(harness.ctx.clone());

        let device = service
            .ingest(report(json!({
                "device_id": "TMP0001",
                "claimed": true,
                "params": {"temperatura": 45.0, "humedad": 50}
            })))
            .await
            .unwrap();

        assert!(device.claimed);
        assert_eq!(device.params["temperatura"], json!(45.0));
        assert_eq!(harness.history.samples.lock().unwrap().len(), 1);
        assert!(harness.devices.store.lock().unwrap().contains_key(&device.id));

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Anomaly);
    }

    #[tokio::test]
    async fn should_merge_config_without_history_for_config_only_report() {
        let existing = Device::builder()
            .serial("LGT0001")
            .claimed(true)
            .config("modo", "horario")
            .config("intervalo_envio", 60)
            .build()
            .unwrap();
        let harness = Harness::new([existing]);
        let service = service(harness.ctx.clone());

        let device = service
            .ingest(report(json!({
                "device_id": "LGT0001",
                "config": {"modo": "manual"},
                "state": "activo"
            })))
            .await
            .unwrap();

        assert_eq!(device.config["modo"], json!("manual"));
        assert_eq!(device.config["intervalo_envio"], json!(60));
        assert_eq!(device.state, "activo");
        assert!(harness.history.samples.lock().unwrap().is_empty());
    }

    /// Fails the first upsert with a conflict, like a racing insert would.
    struct RacingDevices {
        inner: InMemoryDevices,
        conflicts: Mutex<u32>,
    }

    #[async_trait]
    impl DeviceRepository for RacingDevices {
        async fn get(&self, id: &DeviceId) -> Result<Option<Device>, HubError> {
            self.inner.get(id).await
        }

        async fn list(&self) -> Result<Vec<Device>, HubError> {
            self.inner.list().await
        }

        async fn upsert(&self, device: Device) -> Result<Device, HubError> {
            let conflict = {
                let mut remaining = self.conflicts.lock().unwrap();
                let conflict = *remaining > 0;
                *remaining = remaining.saturating_sub(1);
                conflict
            };
            if conflict {
                return Err(ConflictError {
                    entity: "Device",
                    id: device.id.to_string(),
                }
                .into());
            }
            self.inner.upsert(device).await
        }

        async fn update_settings(&self, device: &Device) -> Result<(), HubError> {
            self.inner.update_settings(device).await
        }
    }

    fn racing_context(harness: &Harness, conflicts: u32) -> (RuleContext, Arc<RacingDevices>) {
        let devices = Arc::new(RacingDevices {
            inner: InMemoryDevices::default(),
            conflicts: Mutex::new(conflicts),
        });
        let mut ctx = harness.ctx.clone();
        ctx.devices = devices.clone();
        (ctx, devices)
    }

    #[tokio::test]
    async fn should_retry_once_on_conflict() {
        let harness = Harness::new([]);
        let (ctx, devices) = racing_context(&harness, 1);
        let service = service(ctx);

        let result = service
            .ingest(report(json!({"device_id": "TMP0009", "params": {"temperatura": 20}})))
            .await;

        assert!(result.is_ok());
        assert_eq!(devices.inner.store.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_give_up_after_second_conflict() {
        let harness = Harness::new([]);
        let (ctx, _devices) = racing_context(&harness, 2);
        let service = service(ctx);

        let result = service
            .ingest(report(json!({"device_id": "TMP0009"})))
            .await;

        assert!(matches!(result, Err(EngineError::Hub(err)) if err.is_conflict()));
    }
}
