//! Error types for KeelDB.

use thiserror::Error;

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;

/// Errors that can occur in KeelDB operations.
#[derive(Debug, Error)]
pub enum KeelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u32 },

    // Buffer pool errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page still pinned: {page_id}")]
    PageStillPinned { page_id: u32 },

    // Header page errors
    #[error("Header page full")]
    HeaderFull,

    #[error("Header record already exists: {0}")]
    RecordExists(String),

    #[error("Header record not found: {0}")]
    RecordNotFound(String),

    // B+ tree errors
    #[error("Duplicate key")]
    DuplicateKey,

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
