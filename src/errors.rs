//! Crate-wide error types.
//!
//! Lower layers (`storage`, `btree`, `wire`) define their own focused
//! `thiserror` enums; this module's `DbError` is the boundary type returned
//! by `Database`/`Collection` and wraps those via `#[from]`, the same shape
//! the teacher crate's `errors.rs` uses to wrap `bincode`/`serde_json`/`bson`.

use thiserror::Error;

use crate::storage::pager::PagerError;
use crate::storage::wal::WalError;
use crate::btree::BTreeError;
use crate::wire::WireError;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BSON: {0}")]
    Bson(#[from] bson::ser::Error),

    #[error("BSON decode: {0}")]
    BsonDe(#[from] bson::de::Error),

    #[error(transparent)]
    Pager(#[from] PagerError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    BTree(#[from] BTreeError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("invalid _id field: {0}")]
    InvalidIdField(String),

    #[error("E11000 duplicate key error, key pattern: {key_pattern}, key value: {key_value}")]
    DuplicateKey { key_pattern: String, key_value: String },

    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    #[error("cursor not found: {0}")]
    CursorNotFound(u64),

    #[error("no such command: '{0}'")]
    CommandNotFound(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("collection not found: {0}")]
    NoSuchCollection(String),

    #[error("out of space")]
    OutOfSpace,

    #[error("deadlock detected")]
    DeadlockDetected,

    #[error("cannot create index: {0}")]
    CannotCreateIndex(String),

    #[error("database not open")]
    FileNotOpen,
}

impl DbError {
    /// Maps an error to MongoDB's `{code, codeName}` pair for wire responses.
    #[must_use]
    pub fn code(&self) -> (i32, &'static str) {
        match self {
            DbError::BadValue(_) => (2, "BadValue"),
            DbError::InvalidNamespace(_) => (73, "InvalidNamespace"),
            DbError::InvalidIdField(_) => (2, "InvalidIdField"),
            DbError::DuplicateKey { .. } => (11000, "DuplicateKey"),
            DbError::IllegalOperation(_) => (20, "IllegalOperation"),
            DbError::CursorNotFound(_) => (43, "CursorNotFound"),
            DbError::CommandNotFound(_) => (59, "CommandNotFound"),
            DbError::OutOfSpace => (39, "OutOfSpace"),
            DbError::DeadlockDetected => (246, "DeadlockDetected"),
            DbError::CannotCreateIndex(_) => (67, "CannotCreateIndex"),
            DbError::NoSuchCollection(_) => (26, "NamespaceNotFound"),
            DbError::Wire(_) => (9001, "ProtocolError"),
            DbError::Pager(PagerError::PageNotFound(_)) => (28, "PageNotFound"),
            DbError::Pager(PagerError::PageCorrupted(_)) => (27, "PageCorrupted"),
            DbError::Pager(PagerError::ChecksumMismatch(_)) => (27, "ChecksumMismatch"),
            DbError::Pager(PagerError::InvalidMagic) => (8, "InvalidMagic"),
            DbError::Pager(PagerError::InvalidVersion(_)) => (8, "InvalidVersion"),
            DbError::Pager(PagerError::FileCorrupted(_)) => (8, "FileCorrupted"),
            DbError::Wal(WalError::Corrupted(_)) => (8, "WALCorrupted"),
            DbError::BTree(BTreeError::PageCorrupted(_)) => (27, "PageCorrupted"),
            DbError::BTree(BTreeError::DuplicateKey) => (11000, "DuplicateKey"),
            _ => (1, "InternalError"),
        }
    }

    #[must_use]
    pub fn duplicate_key(key_pattern: &str, key_value: &str) -> Self {
        DbError::DuplicateKey { key_pattern: key_pattern.to_string(), key_value: key_value.to_string() }
    }
}

pub type DbResult<T> = Result<T, DbError>;
