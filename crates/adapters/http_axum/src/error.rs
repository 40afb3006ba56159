//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use hubwatch_app::error::{EngineError, WeatherError};
use hubwatch_domain::error::HubError;

/// JSON error body returned by API endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps application errors to an HTTP response with appropriate status code.
#[derive(Debug)]
pub enum ApiError {
    /// Rule engine or port failure.
    Engine(EngineError),
    /// No weather snapshot could be produced.
    Weather(WeatherError),
    /// The request itself is malformed.
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        Self::Engine(EngineError::Hub(err))
    }
}

impl From<WeatherError> for ApiError {
    fn from(err: WeatherError) -> Self {
        Self::Weather(err)
    }
}

fn hub_status(err: &HubError) -> (StatusCode, String) {
    match err {
        HubError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        HubError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string()),
        HubError::Conflict(err) => (StatusCode::CONFLICT, err.to_string()),
        HubError::Storage(err) => {
            tracing::error!(error = %err, "storage error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Engine(EngineError::UnknownRule(_)) => {
                (StatusCode::NOT_FOUND, self.message())
            }
            Self::Engine(EngineError::Dispatch(_)) => {
                tracing::error!("dispatcher refused work");
                (StatusCode::SERVICE_UNAVAILABLE, self.message())
            }
            Self::Engine(EngineError::Hub(err)) => hub_status(err),
            Self::Weather(WeatherError::Unavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.message())
            }
            Self::Weather(WeatherError::Provider(err)) => {
                tracing::warn!(error = %err, "weather provider error");
                (StatusCode::BAD_GATEWAY, self.message())
            }
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl ApiError {
    fn message(&self) -> String {
        match self {
            Self::Engine(err) => err.to_string(),
            Self::Weather(err) => err.to_string(),
            Self::BadRequest(message) => message.clone(),
        }
    }
}
