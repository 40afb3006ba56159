//! Directory of labelled on/off history files, one `<serial>.csv` per device.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use hubwatch_app::ports::ScheduleCsvSource;
use hubwatch_domain::error::HubError;
use hubwatch_domain::id::DeviceId;

use crate::error::FileStoreError;
use crate::file_stem;

/// Reads schedule CSVs from a directory.
pub struct CsvDirectory {
    dir: PathBuf,
}

impl CsvDirectory {
    /// Read files from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ScheduleCsvSource for CsvDirectory {
    async fn read(&self, device_id: &DeviceId) -> Result<Option<String>, HubError> {
        let path = self.dir.join(format!("{}.csv", file_stem(device_id)));
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FileStoreError::io(path, err).into()),
        }
    }
}
