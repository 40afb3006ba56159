//! `SQLite` implementation of [`SampleHistory`].

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use hubwatch_app::ports::SampleHistory;
use hubwatch_domain::error::HubError;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::sample::HistoricalSample;
use hubwatch_domain::time::Timestamp;

use crate::error::StorageError;
use crate::time;

/// Wrapper for converting database rows into domain [`HistoricalSample`].
struct Wrapper(HistoricalSample);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let device_id: String = row.try_get("device_id")?;
        let recorded_at: String = row.try_get("recorded_at")?;
        let fields: String = row.try_get("fields")?;

        let device_id =
            DeviceId::from_str(&device_id).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        let fields =
            serde_json::from_str(&fields).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

        Ok(Self(HistoricalSample::new(
            device_id,
            time::decode(&recorded_at)?,
            fields,
        )))
    }
}

const INSERT: &str = "INSERT INTO samples (device_id, recorded_at, fields) VALUES (?, ?, ?)";
const SELECT_RANGE: &str = r"SELECT device_id, recorded_at, fields FROM samples
WHERE device_id = ? AND recorded_at >= ? AND recorded_at <= ?
ORDER BY recorded_at ASC, id ASC
LIMIT ?";

/// `SQLite`-backed sample history.
pub struct SqliteSampleHistory {
    pool: SqlitePool,
}

impl SqliteSampleHistory {
    /// Create a new history using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SampleHistory for SqliteSampleHistory {
    async fn append(&self, sample: HistoricalSample) -> Result<(), HubError> {
        let fields = serde_json::to_string(&sample.fields).map_err(StorageError::from)?;

        sqlx::query(INSERT)
            .bind(sample.device_id.as_str())
            .bind(time::encode(sample.recorded_at))
            .bind(fields)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(())
    }

    async fn range(
        &self,
        device_id: &DeviceId,
        from: Timestamp,
        to: Timestamp,
        limit: usize,
    ) -> Result<Vec<HistoricalSample>, HubError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_RANGE)
            .bind(device_id.as_str())
            .bind(time::encode(from))
            .bind(time::encode(to))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| w.0).collect())
    }
}
