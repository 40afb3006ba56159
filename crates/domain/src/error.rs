//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HubError`]
//! via `#[from]` or an explicit `From` impl.

/// Top-level error shared by ports and services.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A domain invariant was violated.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// The requested record does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// A concurrent writer created the same record first.
    #[error("conflict")]
    Conflict(#[from] ConflictError),

    /// The persistence backend failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HubError {
    /// Whether retrying the operation once after a re-read may succeed.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Domain invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A device serial must not be empty.
    #[error("device serial must not be empty")]
    EmptySerial,

    /// Bin width must be positive and divide a day evenly.
    #[error("bin width of {0} minutes does not divide a day")]
    InvalidBinWidth(u32),

    /// The UTC offset is outside the representable range.
    #[error("UTC offset of {0} minutes is out of range")]
    InvalidUtcOffset(i32),

    /// A comparison operator is not one of `>`, `>=`, `<`, `<=`, `==`, `!=`.
    #[error("unknown comparator '{0}'")]
    UnknownComparator(String),

    /// A rule name was empty.
    #[error("rule name must not be empty")]
    EmptyRuleName,
}

/// A lookup found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    /// Kind of record that was looked up (e.g. `"Device"`).
    pub entity: &'static str,
    /// Identifier that was looked up.
    pub id: String,
}

/// A uniqueness constraint was violated by a concurrent writer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} already exists: {id}")]
pub struct ConflictError {
    /// Kind of record that collided.
    pub entity: &'static str,
    /// Identifier that collided.
    pub id: String,
}
