//! Historical samples: append-only metric snapshots per device.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::DeviceId;
use crate::signal::numeric_value;
use crate::time::Timestamp;

/// One recorded snapshot of a device's metric fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSample {
    /// Device the snapshot belongs to.
    pub device_id: DeviceId,
    /// When the snapshot was taken (UTC).
    pub recorded_at: Timestamp,
    /// Raw fields as received.
    pub fields: Map<String, Value>,
}

impl HistoricalSample {
    /// Create a new sample.
    #[must_use]
    pub fn new(device_id: DeviceId, recorded_at: Timestamp, fields: Map<String, Value>) -> Self {
        Self {
            device_id,
            recorded_at,
            fields,
        }
    }

    /// Numeric value of one field, if present and numeric.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(numeric_value)
    }
}

/// Collect every numeric value of `metric` from a slice of samples.
#[must_use]
pub fn metric_values(samples: &[HistoricalSample], metric: &str) -> Vec<f64> {
    samples.iter().filter_map(|s| s.metric(metric)).collect()
}
