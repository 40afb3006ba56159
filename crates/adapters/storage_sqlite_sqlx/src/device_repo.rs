//! `SQLite` implementation of [`DeviceRepository`].
//!
//! `params` and `config` are stored as JSON objects in text columns.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use hubwatch_app::ports::DeviceRepository;
use hubwatch_domain::device::Device;
use hubwatch_domain::error::{HubError, NotFoundError};
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::time::now;

use crate::error::StorageError;
use crate::time;

/// Wrapper for converting database rows into domain [`Device`].
struct Wrapper(Device);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Device> {
        value.map(|w| w.0)
    }
}

fn json_object(raw: &str) -> Result<Map<String, Value>, sqlx::Error> {
    serde_json::from_str(raw).map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let claimed: bool = row.try_get("claimed")?;
        let state: String = row.try_get("state")?;
        let params: String = row.try_get("params")?;
        let config: String = row.try_get("config")?;

        let id = DeviceId::from_str(&id).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

        Ok(Self(Device {
            id,
            claimed,
            state,
            params: json_object(&params)?,
            config: json_object(&config)?,
        }))
    }
}

const INSERT: &str = r"INSERT INTO devices (id, claimed, state, params, config, updated_at)
VALUES (?, ?, ?, ?, ?, ?)";
const SELECT_BY_ID: &str = "SELECT * FROM devices WHERE id = ?";
const SELECT_ALL: &str = "SELECT * FROM devices ORDER BY id";
const UPDATE: &str = r"UPDATE devices
SET claimed = ?, state = ?, params = ?, config = ?, updated_at = ?
WHERE id = ?";
const UPDATE_SETTINGS: &str = "UPDATE devices SET state = ?, config = ?, updated_at = ? WHERE id = ?";

/// `SQLite`-backed device registry.
pub struct SqliteDeviceRepository {
    pool: SqlitePool,
}

impl SqliteDeviceRepository {
    /// Create a new repository using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRepository for SqliteDeviceRepository {
    async fn get(&self, id: &DeviceId) -> Result<Option<Device>, HubError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }

    async fn list(&self) -> Result<Vec<Device>, HubError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn upsert(&self, device: Device) -> Result<Device, HubError> {
        let params = serde_json::to_string(&device.params).map_err(StorageError::from)?;
        let config = serde_json::to_string(&device.config).map_err(StorageError::from)?;
        let updated_at = time::encode(now());

        let updated = sqlx::query(UPDATE)
            .bind(device.claimed)
            .bind(&device.state)
            .bind(&params)
            .bind(&config)
            .bind(&updated_at)
            .bind(device.id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        if updated.rows_affected() > 0 {
            return Ok(device);
        }

        sqlx::query(INSERT)
            .bind(device.id.as_str())
            .bind(device.claimed)
            .bind(&device.state)
            .bind(&params)
            .bind(&config)
            .bind(&updated_at)
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::on_insert(err, "Device", device.id.as_str()))?;

        Ok(device)
    }

    async fn update_settings(&self, device: &Device) -> Result<(), HubError> {
        let config = serde_json::to_string(&device.config).map_err(StorageError::from)?;

        let result = sqlx::query(UPDATE_SETTINGS)
            .bind(&device.state)
            .bind(&config)
            .bind(time::encode(now()))
            .bind(device.id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Err(NotFoundError {
                entity: "Device",
                id: device.id.to_string(),
            }
            .into());
        }
        Ok(())
    }
}
