//! # hubwatch-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Stream rule events to listeners as **Server-Sent Events**
//!   (`/api/stream`, optionally filtered by kind)
//! - Accept operator requests: batch audits (`/api/rules/{name}/batch`),
//!   telemetry intake (`/api/telemetry`) and weather injection
//!   (`/api/weather/inject`)
//! - Map HTTP requests into application service calls (driving adapter)
//! - Map application results and errors into JSON responses
//!
//! ## Dependency rule
//! Depends on `hubwatch-app` (for services and the event bus) and
//! `hubwatch-domain` (for types used in request/response mapping). Never
//! leaks axum types into the domain.

pub mod api;
pub mod error;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
