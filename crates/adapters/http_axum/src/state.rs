//! Shared application state for axum handlers.

use std::sync::Arc;

use hubwatch_app::event_bus::EventBus;
use hubwatch_app::services::rule_engine::RuleEngine;
use hubwatch_app::services::telemetry_service::TelemetryService;
use hubwatch_app::services::weather_service::WeatherService;

/// Application state shared across all axum handlers.
///
/// Every field is a cheap handle, so cloning per request is fine.
#[derive(Clone)]
pub struct AppState {
    /// Batch triggers and rule listing.
    pub engine: RuleEngine,
    /// Telemetry intake.
    pub telemetry: TelemetryService,
    /// Current conditions and injection.
    pub weather: Arc<WeatherService>,
    /// Source of streamed rule events.
    pub bus: EventBus,
}

impl AppState {
    /// Build the state around a rule engine; the weather service and the
    /// bus are the ones the rules see.
    #[must_use]
    pub fn new(engine: RuleEngine) -> Self {
        let weather = Arc::clone(&engine.context().weather);
        let bus = engine.context().bus.clone();
        Self {
            telemetry: TelemetryService::new(engine.clone()),
            engine,
            weather,
            bus,
        }
    }
}
