//! # hubwatch-app
//!
//! Application layer: the rule-evaluation core and its **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `DeviceRepository`: read and update the device registry
//!   - `SampleHistory`: append and range-query historical samples
//!   - `ModelStore`: persist learned schedule models
//!   - `ScheduleCsvSource`: read labelled on/off history
//!   - `WeatherProvider`: fetch current conditions
//! - Provide **in-process infrastructure** that doesn't need IO: the
//!   bounded-queue `EventBus` and the worker-pool `Dispatcher`
//! - Define the `Rule` trait, the ordered `RuleRegistry`, and the five rules
//! - Define **driving/inbound ports** as services:
//!   - `RuleEngine`: dispatch signals and trigger batch runs
//!   - `TelemetryService`: record a snapshot, then dispatch it
//!   - `WeatherService`: cached, injectable weather snapshots
//!
//! ## Dependency rule
//! Depends on `hubwatch-domain` only (plus `tokio` for channels and tasks).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod ports;
pub mod rules;
pub mod services;

mod sync;
