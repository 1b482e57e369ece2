use thiserror::Error;

use crate::types::NarrativeId;

#[derive(Error, Debug)]
pub enum ThreadlineError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Composer error: {0}")]
    Composer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Write conflict on narrative {0}: version changed since read")]
    WriteConflict(NarrativeId),

    #[error("Narrative {0} not found")]
    NotFound(NarrativeId),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
