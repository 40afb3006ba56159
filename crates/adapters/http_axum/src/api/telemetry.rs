//! Telemetry intake.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use hubwatch_app::services::telemetry_service::TelemetryReport;
use hubwatch_domain::device::Device;

use crate::error::ApiError;
use crate::state::AppState;

/// Possible responses from the intake endpoint.
pub enum IngestResponse {
    Accepted(Json<Device>),
}

impl IntoResponse for IngestResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Accepted(json) => (StatusCode::ACCEPTED, json).into_response(),
        }
    }
}

/// `POST /api/telemetry`
///
/// Stores the snapshot and queues rule evaluation; answers with the stored
/// device record before any rule has run.
pub async fn ingest(
    State(state): State<AppState>,
    Json(report): Json<TelemetryReport>,
) -> Result<IngestResponse, ApiError> {
    let device = state.telemetry.ingest(report).await?;
    Ok(IngestResponse::Accepted(Json(device)))
}
