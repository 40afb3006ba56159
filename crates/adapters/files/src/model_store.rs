//! JSON implementation of [`ModelStore`].
//!
//! One `<serial>.json` per device. Saves go through a sibling temporary file
//! and a rename so a crash never leaves a truncated model behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use hubwatch_app::ports::ModelStore;
use hubwatch_domain::error::HubError;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::schedule::model::ScheduleModel;

use crate::error::FileStoreError;
use crate::file_stem;

/// Directory of per-device schedule models.
pub struct JsonModelStore {
    dir: PathBuf,
}

impl JsonModelStore {
    /// Store models under `dir`, created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the models.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, device_id: &DeviceId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(device_id)))
    }
}

#[async_trait]
impl ModelStore for JsonModelStore {
    async fn load(&self, device_id: &DeviceId) -> Result<Option<ScheduleModel>, HubError> {
        let path = self.path(device_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(FileStoreError::io(path, err).into()),
        };
        let model = serde_json::from_slice(&raw).map_err(|err| FileStoreError::json(&path, err))?;
        Ok(Some(model))
    }

    async fn save(&self, device_id: &DeviceId, model: &ScheduleModel) -> Result<(), HubError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| FileStoreError::io(&self.dir, err))?;

        let path = self.path(device_id);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec(model).map_err(|err| FileStoreError::json(&path, err))?;
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|err| FileStoreError::io(&tmp, err))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| FileStoreError::io(&path, err))?;

        tracing::trace!(device_id = %device_id, updates = model.updates(), "schedule model saved");
        Ok(())
    }

    async fn remove(&self, device_id: &DeviceId) -> Result<(), HubError> {
        let path = self.path(device_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FileStoreError::io(path, err).into()),
        }
    }
}
