//! # hubwatch-adapter-files
//!
//! Filesystem-backed artifacts under the daemon's data directory.
//!
//! ## Responsibilities
//! - Implement `ModelStore` with one JSON file per device, written atomically
//! - Implement `ScheduleCsvSource` over a directory of `<serial>.csv` files
//! - Load the standards tables (`limits.json`, `standards.json`,
//!   `weather_rules.json`), creating them with built-in defaults when missing
//!
//! ## Dependency rule
//! Depends on `hubwatch-app` (for port traits) and `hubwatch-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod csv_source;
pub mod error;
pub mod model_store;
pub mod standards;

pub use csv_source::CsvDirectory;
pub use model_store::JsonModelStore;
pub use standards::load_standards;

use hubwatch_domain::id::DeviceId;

/// File stem for a device; anything outside `[A-Za-z0-9_-]` becomes `_`.
fn file_stem(device_id: &DeviceId) -> String {
    device_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
