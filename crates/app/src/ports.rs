//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the rule-evaluation core and the outside
//! world. They are defined here (in `app`) so that both the rule layer and
//! the adapter layer can depend on them without creating circular
//! dependencies.
//!
//! Every port is object-safe (`#[async_trait]`) because rules receive them
//! as `Arc<dyn …>` inside an explicit [`RuleContext`](crate::rules::RuleContext).

pub mod models;
pub mod storage;
pub mod weather;

pub use models::{ModelStore, ScheduleCsvSource};
pub use storage::{DeviceRepository, SampleHistory};
pub use weather::WeatherProvider;
