//! In-memory ports for handler tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use hubwatch_app::dispatcher::Dispatcher;
use hubwatch_app::error::WeatherError;
use hubwatch_app::event_bus::EventBus;
use hubwatch_app::ports::{DeviceRepository, SampleHistory, WeatherProvider};
use hubwatch_app::rules::anomaly::AnomalyRule;
use hubwatch_app::rules::misconfig::MisconfigRule;
use hubwatch_app::rules::{RuleContext, RuleRegistry};
use hubwatch_app::services::rule_engine::RuleEngine;
use hubwatch_app::services::weather_service::WeatherService;
use hubwatch_domain::device::Device;
use hubwatch_domain::error::{HubError, NotFoundError};
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::sample::HistoricalSample;
use hubwatch_domain::standards::Standards;
use hubwatch_domain::time::{LocalZone, Timestamp};

use crate::state::AppState;

#[derive(Default)]
pub struct MemoryDevices {
    pub store: Mutex<HashMap<DeviceId, Device>>,
}

#[async_trait]
impl DeviceRepository for MemoryDevices {
    async fn get(&self, id: &DeviceId) -> Result<Option<Device>, HubError> {
        Ok(self.store.lock().unwrap().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Device>, HubError> {
        Ok(self.store.lock().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, device: Device) -> Result<Device, HubError> {
        self.store
            .lock()
            .unwrap()
            .insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn update_settings(&self, device: &Device) -> Result<(), HubError> {
        let mut store = self.store.lock().unwrap();
        let Some(stored) = store.get_mut(&device.id) else {
            return Err(NotFoundError {
                entity: "Device",
                id: device.id.to_string(),
            }
            .into());
        };
        stored.config.clone_from(&device.config);
        stored.state.clone_from(&device.state);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHistory {
    pub samples: Mutex<Vec<HistoricalSample>>,
}

#[async_trait]
impl SampleHistory for MemoryHistory {
    async fn append(&self, sample: HistoricalSample) -> Result<(), HubError> {
        self.samples.lock().unwrap().push(sample);
        Ok(())
    }

    async fn range(
        &self,
        device_id: &DeviceId,
        from: Timestamp,
        to: Timestamp,
        limit: usize,
    ) -> Result<Vec<HistoricalSample>, HubError> {
        Ok(self
            .samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| &s.device_id == device_id && s.recorded_at >= from && s.recorded_at <= to)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Provider that is always down.
pub struct Offline;

#[async_trait]
impl WeatherProvider for Offline {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn fetch(&self) -> Result<Map<String, Value>, WeatherError> {
        Err(WeatherError::Provider("no network in tests".into()))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub devices: Arc<MemoryDevices>,
    pub history: Arc<MemoryHistory>,
}

/// State over in-memory ports, a running dispatcher and two rules.
pub fn app(devices: impl IntoIterator<Item = Device>) -> TestApp {
    let repo = Arc::new(MemoryDevices::default());
    for device in devices {
        repo.store.lock().unwrap().insert(device.id.clone(), device);
    }
    let history = Arc::new(MemoryHistory::default());
    let context = RuleContext {
        devices: repo.clone(),
        history: history.clone(),
        bus: EventBus::new(16),
        weather: Arc::new(WeatherService::new(Arc::new(Offline), 60)),
        standards: Arc::new(Standards::default()),
        zone: LocalZone::utc(),
    };
    let mut registry = RuleRegistry::new();
    registry.register(Arc::new(AnomalyRule::default())).unwrap();
    registry.register(Arc::new(MisconfigRule::default())).unwrap();
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.start(1);

    TestApp {
        state: AppState::new(RuleEngine::new(registry, dispatcher, context)),
        devices: repo,
        history,
    }
}

pub fn thermometer() -> Device {
    Device::builder()
        .serial("TMP0001")
        .claimed(true)
        .build()
        .unwrap()
}
