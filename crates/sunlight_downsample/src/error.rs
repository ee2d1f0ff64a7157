//! Error types for the downsampling engine.

use thiserror::Error;

use crate::config::ConfigError;
use crate::lock::LockError;

/// Errors raised by warehouse reads and writes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Warehouse error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timestamp out of range: {0} microseconds since epoch")]
    TimestampOutOfRange(i64),

    #[error("Warehouse unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

impl StoreError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Whether a retry by the scheduler could plausibly succeed.
    ///
    /// Lock contention, interrupted IO and write conflicts clear up on their
    /// own. Bad data and schema problems do not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(_) | StoreError::Unavailable(_) => true,
            StoreError::Transaction(msg) => is_transient_message(msg),
            StoreError::DuckDb(err) => is_transient_message(&err.to_string()),
            StoreError::InvalidInput(_) | StoreError::TimestampOutOfRange(_) => false,
        }
    }
}

fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    ["lock", "conflict", "busy", "timeout", "interrupt"]
        .iter()
        .any(|needle| msg.contains(needle))
}

/// Errors raised by a downsampling run.
#[derive(Debug, Error)]
pub enum DownsampleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl DownsampleError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Whether the run failed for a reason that a later attempt may not hit.
    pub fn is_transient(&self) -> bool {
        match self {
            DownsampleError::Store(err) => err.is_transient(),
            // Another run holds the lock, or the lock file could not be touched.
            DownsampleError::Lock(_) => true,
            DownsampleError::Config(_) | DownsampleError::Invariant(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DownsampleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::unavailable("poisoned").is_transient());
        assert!(StoreError::Transaction("write-write conflict on key".into()).is_transient());
        assert!(!StoreError::invalid_input("bad row").is_transient());
        assert!(!StoreError::TimestampOutOfRange(i64::MAX).is_transient());

        let locked = DownsampleError::Lock(LockError::Locked {
            path: PathBuf::from("/tmp/w.duckdb.run.lock"),
            holder: None,
        });
        assert!(locked.is_transient());
        assert!(!DownsampleError::invariant("duplicate key").is_transient());
    }
}
