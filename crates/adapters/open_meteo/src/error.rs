//! Open-Meteo adapter error type.

use hubwatch_app::error::WeatherError;

/// Errors originating from the Open-Meteo adapter.
#[derive(Debug, thiserror::Error)]
pub enum OpenMeteoError {
    /// Building the client, sending the request or reading the body failed.
    #[error("open-meteo request failed")]
    Http(#[from] reqwest::Error),

    /// The response carried neither `current` nor `current_weather`.
    #[error("open-meteo response has no current conditions")]
    MissingCurrent,
}

impl From<OpenMeteoError> for WeatherError {
    fn from(err: OpenMeteoError) -> Self {
        Self::Provider(Box::new(err))
    }
}
