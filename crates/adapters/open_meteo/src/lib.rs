//! # hubwatch-adapter-open-meteo
//!
//! Weather provider backed by the [Open-Meteo](https://open-meteo.com) forecast API.
//!
//! ## Responsibilities
//! - Implement `WeatherProvider` from `hubwatch-app::ports::weather`
//! - Translate configured canonical field names into Open-Meteo `current` fields
//! - Enforce connect and read timeouts on every request
//!
//! ## Dependency rule
//! Depends on `hubwatch-app` (for port traits) and `hubwatch-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod client;
pub mod error;

pub use client::{Config, DEFAULT_BASE_URL, OpenMeteoProvider};
