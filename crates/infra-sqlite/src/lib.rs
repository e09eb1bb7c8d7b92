// Recall Infrastructure - SQLite Adapter
// Implements: JobStore, StorageService (knowledge store)

mod connection;
mod error;
mod job_store;
mod knowledge_store;
mod migration;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use knowledge_store::SqliteKnowledgeStore;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by map_sqlx_error
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
