// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod message;

// Re-exports
pub use error::DomainError;
pub use job::{
    Completion, Dispatch, Job, JobId, JobPayload, JobStatus, JobType, PageData, ProgressUpdate,
};
pub use message::{Destination, MessageType, NotificationMessage, Topic};
