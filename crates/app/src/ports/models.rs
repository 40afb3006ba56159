//! Schedule learner artifacts: persisted models and labelled CSV history.

use async_trait::async_trait;

use hubwatch_domain::error::HubError;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::schedule::model::ScheduleModel;

/// Per-device storage of learned schedule models.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// The stored model, if any.
    async fn load(&self, device_id: &DeviceId) -> Result<Option<ScheduleModel>, HubError>;

    /// Replace the stored model.
    async fn save(&self, device_id: &DeviceId, model: &ScheduleModel) -> Result<(), HubError>;

    /// Delete the stored model. Deleting a missing model is not an error.
    async fn remove(&self, device_id: &DeviceId) -> Result<(), HubError>;
}

/// Labelled on/off history (`timestamp,encendido|estado`) per device.
#[async_trait]
pub trait ScheduleCsvSource: Send + Sync {
    /// Raw CSV text, or `None` when the device has no file.
    async fn read(&self, device_id: &DeviceId) -> Result<Option<String>, HubError>;
}
