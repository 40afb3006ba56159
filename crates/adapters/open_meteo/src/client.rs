//! Open-Meteo `current` conditions client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use hubwatch_app::error::WeatherError;
use hubwatch_app::ports::WeatherProvider;
use hubwatch_domain::weather::{DEFAULT_PROVIDER_FIELDS, provider_field};

use crate::error::OpenMeteoError;

/// Public forecast endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Connection settings for [`OpenMeteoProvider`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Forecast endpoint.
    pub base_url: String,
    /// Site latitude.
    pub latitude: f64,
    /// Site longitude.
    pub longitude: f64,
    /// Canonical field names to request; unknown names are ignored.
    pub fields: Vec<String>,
    /// Maximum time to establish the connection.
    pub connect_timeout: Duration,
    /// Maximum time between two reads of the response.
    pub read_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            fields: Vec::new(),
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Build a provider from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OpenMeteoError::Http`] if the HTTP client cannot be built.
    pub fn build(self) -> Result<OpenMeteoProvider, OpenMeteoError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .build()?;
        let current = current_fields(&self.fields);
        Ok(OpenMeteoProvider {
            client,
            base_url: self.base_url,
            latitude: self.latitude,
            longitude: self.longitude,
            current,
        })
    }
}

/// Comma-separated provider fields for the `current` query parameter.
fn current_fields(canonical: &[String]) -> String {
    let mut wanted: Vec<&str> = Vec::new();
    for name in canonical {
        if let Some(field) = provider_field(name)
            && !wanted.contains(&field)
        {
            wanted.push(field);
        }
    }
    if wanted.is_empty() {
        wanted.extend(DEFAULT_PROVIDER_FIELDS);
    }
    wanted.join(",")
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    current: Option<Map<String, Value>>,
    #[serde(default)]
    current_weather: Option<Map<String, Value>>,
}

impl Response {
    fn into_current(self) -> Result<Map<String, Value>, OpenMeteoError> {
        self.current
            .or(self.current_weather)
            .ok_or(OpenMeteoError::MissingCurrent)
    }
}

/// [`WeatherProvider`] over the Open-Meteo HTTP API.
pub struct OpenMeteoProvider {
    client: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
    current: String,
}

impl OpenMeteoProvider {
    async fn request(&self) -> Result<Map<String, Value>, OpenMeteoError> {
        let response: Response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("current", self.current.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response.into_current()
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn name(&self) -> &'static str {
        "open-meteo"
    }

    async fn fetch(&self) -> Result<Map<String, Value>, WeatherError> {
        let current = self.request().await?;
        tracing::debug!(fields = current.len(), "open-meteo conditions fetched");
        Ok(current)
    }
}
