//! Application services: use-case implementations.
//!
//! Services receive their ports as `Arc<dyn …>` (constructor injection),
//! keeping this layer decoupled from concrete adapters.

pub mod rule_engine;
pub mod telemetry_service;
pub mod weather_service;
