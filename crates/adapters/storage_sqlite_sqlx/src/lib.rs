//! # hubwatch-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement `DeviceRepository` and `SampleHistory` from `hubwatch-app::ports::storage`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `hubwatch-app` (for port traits) and `hubwatch-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod device_repo;
pub mod error;
pub mod pool;
pub mod sample_repo;

mod time;

pub use device_repo::SqliteDeviceRepository;
pub use pool::{Config, DEFAULT_BUSY_TIMEOUT, DEFAULT_MAX_CONNECTIONS, Database};
pub use sample_repo::SqliteSampleHistory;
