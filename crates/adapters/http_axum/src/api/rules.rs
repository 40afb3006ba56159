//! Rule listing and operator-triggered batch audits.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use hubwatch_app::rules::BatchRequest;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of the batch acknowledgement.
#[derive(Debug, Serialize)]
pub struct Queued {
    /// Always `queued`.
    pub status: &'static str,
    /// Rule the audit was queued on.
    pub rule: String,
}

/// Possible responses from the batch endpoint.
pub enum BatchResponse {
    Accepted(Json<Queued>),
}

impl IntoResponse for BatchResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Accepted(json) => (StatusCode::ACCEPTED, json).into_response(),
        }
    }
}

/// `GET /api/rules`
pub async fn list(State(state): State<AppState>) -> Json<Vec<&'static str>> {
    Json(state.engine.rule_names())
}

/// `POST /api/rules/{name}/batch`
///
/// Acknowledges as soon as the audit is queued; findings arrive on the
/// event stream, starting with a `progress` event.
pub async fn run_batch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<BatchRequest>,
) -> Result<BatchResponse, ApiError> {
    state.engine.run_batch(&name, request).await?;
    Ok(BatchResponse::Accepted(Json(Queued {
        status: "queued",
        rule: name,
    })))
}
