//! JSON API handler modules.

#[allow(clippy::missing_errors_doc)]
pub mod rules;
pub mod stream;
#[allow(clippy::missing_errors_doc)]
pub mod telemetry;
#[allow(clippy::missing_errors_doc)]
pub mod weather;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

/// Build the `/api` sub-router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stream", get(stream::stream))
        .route("/rules", get(rules::list))
        .route("/rules/{name}/batch", post(rules::run_batch))
        .route("/telemetry", post(telemetry::ingest))
        .route("/weather", get(weather::current))
        .route("/weather/inject", post(weather::inject))
}
