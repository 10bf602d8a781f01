use std::fmt;

use thiserror::Error;

/// Input field a `create` precondition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Content,
    MaxViews,
    ExpireAt,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Content => "content",
            Field::MaxViews => "max views",
            Field::ExpireAt => "expire date",
        })
    }
}

/// Errors returned by [`Store`](super::Store).
///
/// `NotFound` deliberately covers missing, expired and exhausted notes.
/// `Storage` and `Corrupt` are internal failures the caller cannot correct.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid {field}")]
    InvalidInput { field: Field },

    #[error("note not found or expired")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_internal(&self) -> bool {
        matches!(self, StoreError::Storage(_) | StoreError::Corrupt(_))
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Storage(err.into())
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
