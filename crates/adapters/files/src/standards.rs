//! Standards tables loaded from the data directory at startup.
//!
//! | file | table |
//! |---|---|
//! | `limits.json` | static metric limits per kind prefix |
//! | `standards.json` | configuration standards per kind prefix |
//! | `weather_rules.json` | weather thresholds per kind prefix |
//!
//! A missing file is written with the built-in defaults. A file that cannot
//! be read or parsed is logged and replaced in memory by the defaults; it is
//! never overwritten.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use hubwatch_domain::standards::{PrefixTable, Standards, default_config_standards, default_limits};

use crate::error::FileStoreError;

/// File name of the metric limits table.
pub const LIMITS_FILE: &str = "limits.json";
/// File name of the configuration standards table.
pub const CONFIG_FILE: &str = "standards.json";
/// File name of the weather thresholds table.
pub const WEATHER_FILE: &str = "weather_rules.json";

/// Load every table from `dir`, creating missing ones.
#[must_use]
pub fn load_standards(dir: &Path) -> Standards {
    Standards {
        limits: load_or_create(&dir.join(LIMITS_FILE), default_limits),
        config: load_or_create(&dir.join(CONFIG_FILE), default_config_standards),
        weather: load_or_create(&dir.join(WEATHER_FILE), PrefixTable::default),
    }
}

fn load_or_create<T, F>(path: &Path, default: F) -> T
where
    T: Serialize + DeserializeOwned,
    F: Fn() -> T,
{
    match read(path) {
        Ok(Some(table)) => table,
        Ok(None) => {
            let table = default();
            match write(path, &table) {
                Ok(()) => tracing::info!(path = %path.display(), "standards table created with defaults"),
                Err(err) => tracing::warn!(%err, path = %path.display(), "unable to write default standards table"),
            }
            table
        }
        Err(err) => {
            tracing::warn!(%err, path = %path.display(), "unreadable standards table, using defaults");
            default()
        }
    }
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FileStoreError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(FileStoreError::io(path, err)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|err| FileStoreError::json(path, err))
}

fn write<T: Serialize>(path: &Path, table: &T) -> Result<(), FileStoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| FileStoreError::io(parent, err))?;
    }
    let raw = serde_json::to_vec_pretty(table).map_err(|err| FileStoreError::json(path, err))?;
    std::fs::write(path, raw).map_err(|err| FileStoreError::io(path, err))
}
