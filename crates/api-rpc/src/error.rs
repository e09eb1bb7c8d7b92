//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use recall_core::domain::DomainError;
use recall_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const WORKER_ERROR: i32 = 5002;
}

fn owned(code: i32, msg: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.into(), None::<()>)
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => owned(code::VALIDATION_ERROR, msg),
        AppError::NotFound(msg) => owned(code::NOT_FOUND, msg),
        AppError::Database(msg) => owned(code::DB_ERROR, msg),
        AppError::Serialization(e) => owned(code::VALIDATION_ERROR, e.to_string()),
        AppError::Domain(e) => match e {
            DomainError::InvalidStateTransition { .. } | DomainError::TerminalJob(_) => {
                owned(code::CONFLICT, e.to_string())
            }
            _ => owned(code::VALIDATION_ERROR, e.to_string()),
        },
        AppError::Internal(msg) => owned(code::INTERNAL_ERROR, msg),
        other if other.is_worker_side() => owned(code::WORKER_ERROR, other.to_string()),
        other => owned(code::INTERNAL_ERROR, other.to_string()),
    }
}

/// Rate limit rejection
pub fn throttled() -> ErrorObjectOwned {
    owned(code::THROTTLED, "Rate limit exceeded. Please slow down.")
}
