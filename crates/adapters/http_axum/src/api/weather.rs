//! Current weather conditions and operator injection.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use hubwatch_app::services::weather_service::WeatherReading;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_INJECT_TTL_SECS: u64 = 60;

fn default_ttl() -> u64 {
    DEFAULT_INJECT_TTL_SECS
}

/// Body of the injection endpoint.
#[derive(Debug, Deserialize)]
pub struct InjectRequest {
    /// Conditions to serve; empty or `null` clears any injection.
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
    /// Lifetime of the injection, in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_sec: u64,
}

/// Whether an injection is now active.
#[derive(Debug, Serialize)]
pub struct InjectResponse {
    /// Always `true`.
    pub ok: bool,
    /// `injected` or `cleared`.
    pub mode: &'static str,
}

/// `GET /api/weather`
pub async fn current(State(state): State<AppState>) -> Result<Json<WeatherReading>, ApiError> {
    let reading = state.weather.current().await?;
    Ok(Json(reading))
}

/// `POST /api/weather/inject`
pub async fn inject(
    State(state): State<AppState>,
    Json(request): Json<InjectRequest>,
) -> Json<InjectResponse> {
    let payload = request.payload.unwrap_or_default();
    let mode = if payload.is_empty() {
        state.weather.clear_injection();
        "cleared"
    } else {
        state.weather.inject(&payload, request.ttl_sec);
        "injected"
    };
    Json(InjectResponse { ok: true, mode })
}
