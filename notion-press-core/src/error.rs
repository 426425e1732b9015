//! Error taxonomy for fetching, converting, publishing and tracking page syncs.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the source content API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The source API could not be reached (connect failure, timeout).
    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// The source API asked us to slow down.
    #[error("rate limited by source (retry after {retry_after:?})")]
    RateLimited {
        /// Server-provided wait hint, when present.
        retry_after: Option<Duration>,
    },

    /// The response did not have the expected shape.
    #[error("malformed response from source: {0}")]
    Malformed(String),

    /// The requested page or block does not exist or is not shared with us.
    #[error("not found in source: {0}")]
    NotFound(String),

    /// Any other non-success status.
    #[error("source returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },
}

impl FetchError {
    /// Returns true if the call may succeed when repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } | FetchError::Unreachable(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised by a single converter. Never escapes the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("malformed {block_type} payload: {reason}")]
    Malformed { block_type: String, reason: String },

    #[error("converter panicked: {0}")]
    Panicked(String),
}

/// Errors raised by the target publishing system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpsertError {
    /// The target refused the write (validation, permissions).
    #[error("target rejected the write: {0}")]
    Rejected(String),

    /// The mapped post no longer exists on the target.
    #[error("target post {0} not found")]
    NotFound(i64),

    #[error("target unreachable: {0}")]
    Unreachable(String),
}

/// Another sync for the same source page is already in flight.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sync already in flight for source page {source_id}")]
pub struct ConflictError {
    pub source_id: String,
}

/// Errors raised by the mapping store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },

    /// A persisted value could not be decoded.
    #[error("corrupt mapping row: {0}")]
    Corrupt(String),

    /// The connection mutex was poisoned by a panicking holder.
    #[error("mapping store lock poisoned")]
    Poisoned,
}

/// Umbrella error for one page sync.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Upsert(#[from] UpsertError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_fetch_errors() {
        assert!(FetchError::RateLimited { retry_after: None }.is_retryable());
        assert!(FetchError::Unreachable("connection reset".into()).is_retryable());
        assert!(FetchError::Status {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!FetchError::Status {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!FetchError::NotFound("abc".into()).is_retryable());
        assert!(!FetchError::Malformed("missing results".into()).is_retryable());
    }

    #[test]
    fn sync_error_display_is_transparent() {
        let err: SyncError = UpsertError::NotFound(42).into();
        assert_eq!(err.to_string(), "target post 42 not found");

        let err: SyncError = ConflictError {
            source_id: "page-1".into(),
        }
        .into();
        assert!(err.to_string().contains("page-1"));
    }
}
