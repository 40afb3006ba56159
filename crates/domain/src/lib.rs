//! # hubwatch-domain
//!
//! Pure domain model for the hubwatch rule-evaluation core.
//!
//! ## Responsibilities
//! - Foundational types: device identifiers, error conventions, timestamps
//!   and the configured local zone
//! - Define **Devices** (the registry view the rules read) and
//!   **Historical samples** (append-only metric snapshots)
//! - Define **Signals** (what a single dispatch carries) and
//!   **Rule events** (what rules publish)
//! - The algorithms every rule relies on: bound fusion and percentiles,
//!   weekly on/off masks, window extraction, the online schedule model,
//!   standards tables and weather snapshot canonicalisation
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod bounds;
pub mod device;
pub mod event;
pub mod sample;
pub mod schedule;
pub mod signal;
pub mod standards;
pub mod weather;
