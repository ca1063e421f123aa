//! Error types for the database engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Page checksum did not match its data region
    #[error("page {page_id} checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CorruptPage {
        page_id: PageId,
        stored: u32,
        computed: u32,
    },

    /// Journal header or record is malformed
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),

    /// Value or document bytes do not match their declared layout
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Numeric or type coercion would lose information
    #[error("cannot convert {from} to {to}")]
    InvalidCast {
        from: &'static str,
        to: &'static str,
    },

    /// Unique index constraint violated
    #[error("duplicate key in unique index '{index}': {key}")]
    DuplicateKey { index: String, key: String },

    /// An index with this name already exists on the collection
    #[error("index '{0}' already exists")]
    IndexExists(String),

    /// No index with this name exists on the collection
    #[error("index '{0}' not found")]
    IndexNotFound(String),

    /// A collection with this name already exists
    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    /// No collection with this name exists
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// A lock could not be acquired within the configured timeout
    #[error("could not acquire {0} lock within timeout")]
    LockTimeout(&'static str),

    /// The operation was cancelled through its token
    #[error("operation cancelled")]
    Cancelled,

    /// Operation on a closed engine or collection
    #[error("engine is closed")]
    Disposed,

    /// Page contents do not form a valid structure of the expected type
    #[error("invalid page: {0}")]
    InvalidPage(String),

    /// Invalid operation for the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is missing its magic, or header fields are inconsistent
    #[error("invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl Error {
    /// Create an invalid encoding error with a message
    pub fn invalid_encoding(msg: impl Into<String>) -> Self {
        Self::InvalidEncoding(msg.into())
    }

    /// Create a corrupt journal error
    pub fn corrupt_journal(msg: impl Into<String>) -> Self {
        Self::CorruptJournal(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    /// Whether the error leaves the engine usable for other collections
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Disposed)
    }
}
