//! Errors raised by the application layer.
//!
//! Port failures travel as [`HubError`]; the types below cover what the
//! core itself can refuse.

use hubwatch_domain::error::HubError;

/// The dispatcher cannot accept work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// `submit` was called before `start` or after `shutdown`.
    #[error("dispatcher is not initialized")]
    NotInitialized,
}

/// Errors returned by the rule engine and the services built on it.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No rule is registered under that name.
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// The dispatcher refused the job.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A port call failed.
    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Errors from the weather pipeline.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    /// The provider could not produce a snapshot.
    #[error("weather provider failed")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Neither a live nor a cached snapshot is available.
    #[error("no weather data available")]
    Unavailable,
}
