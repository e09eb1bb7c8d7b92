// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job {0} is already terminal")]
    TerminalJob(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Job type registered twice: {0}")]
    DuplicateJobType(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
