//! Weather provider port.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::WeatherError;

/// Source of current weather conditions.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Short name reported as the snapshot source.
    fn name(&self) -> &'static str;

    /// Fetch the raw provider response.
    async fn fetch(&self) -> Result<Map<String, Value>, WeatherError>;
}
