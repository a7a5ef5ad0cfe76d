use thiserror::Error;

/// Errors the engine can report. `Slashing` and `Invariant` are fatal and
/// must terminate the node, `Invalid`/`Transient` are logged and dropped
/// or rescheduled by the caller, and `Storage` always propagates.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("slashing condition triggered: {0}")]
    Slashing(String),

    #[error("broken invariant: {0}")]
    Invariant(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("transient condition, retry next tick: {0}")]
    Transient(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Storage(#[from] guardian_persistence::PersistError),
}

impl From<guardian_persistence::BackendError> for EngineError {
    fn from(e: guardian_persistence::BackendError) -> Self {
        EngineError::Storage(e.into())
    }
}

impl EngineError {
    /// Whether this error indicates a broken invariant that must bring the
    /// node down rather than simply being logged.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Slashing(_) | EngineError::Invariant(_))
    }
}
