// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_source;
pub mod job_store;
pub mod services;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use job_source::JobSource;
pub use job_store::JobStore;
pub use services::{
    ChatMessage, ChatRole, EmbeddingService, ExtractedTopic, FlowRunner, LlmService,
    ServiceSet, StorageService,
};
pub use time_provider::TimeProvider;
