//! Storage ports: the device registry and the sample history.

use async_trait::async_trait;

use hubwatch_domain::device::Device;
use hubwatch_domain::error::HubError;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::sample::HistoricalSample;
use hubwatch_domain::time::Timestamp;

/// The registry view of devices.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Look up one device.
    async fn get(&self, id: &DeviceId) -> Result<Option<Device>, HubError>;

    /// Every known device.
    async fn list(&self) -> Result<Vec<Device>, HubError>;

    /// Insert the device, or replace the stored one with the same id.
    ///
    /// Returns [`HubError::Conflict`] when a concurrent writer created the
    /// record between the existence check and the insert.
    async fn upsert(&self, device: Device) -> Result<Device, HubError>;

    /// Persist `config` and `state` of an existing device.
    ///
    /// Returns [`HubError::NotFound`] when the device does not exist.
    async fn update_settings(&self, device: &Device) -> Result<(), HubError>;
}

/// Append-only log of metric snapshots.
#[async_trait]
pub trait SampleHistory: Send + Sync {
    /// Record one snapshot.
    async fn append(&self, sample: HistoricalSample) -> Result<(), HubError>;

    /// Snapshots of one device with `from <= recorded_at <= to`, oldest
    /// first, at most `limit` of them.
    async fn range(
        &self,
        device_id: &DeviceId,
        from: Timestamp,
        to: Timestamp,
        limit: usize,
    ) -> Result<Vec<HistoricalSample>, HubError>;
}
