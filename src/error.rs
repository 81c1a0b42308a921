use crate::vector::VectorError;

/// Errors surfaced by the blob store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A conditional write observed a different version than expected,
    /// or the key was absent where a version match was required.
    #[error("precondition failed for {key}")]
    PreconditionFailed { key: String },
    /// Network trouble, throttling, 5xx — safe to retry.
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid collection name {0:?}")]
    InvalidName(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("mutation batch of {size} bytes exceeds the {limit} byte limit")]
    SizeLimit { size: usize, limit: usize },
    /// Compaction or vacuum found the maintenance lease held by another
    /// live session.
    #[error("maintenance lock is held by another session")]
    LockActive,
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("encode/decode failure: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
