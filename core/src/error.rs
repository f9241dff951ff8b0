use crate::types::Amount;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("amount exceeds remaining balance: requested {requested}, remaining {remaining}")]
    AmountExceedsRemaining { requested: Amount, remaining: Amount },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("concurrent modification detected: {0}")]
    Concurrency(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True for the validation class of the taxonomy: surfaced to the caller
    /// immediately, never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::AmountExceedsRemaining { .. }
                | EngineError::InvalidTransition { .. }
                | EngineError::Validation(_)
        )
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, EngineError::Concurrency(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
