//! Error types for the duplicate engine.
//!
//! Only genuinely invalid input and storage failures are errors. Missing
//! album/duration values are reported as excluded fields, and a cancelled
//! scan is a terminal event rather than an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration failed validation
    #[error("Invalid match configuration: {0}")]
    InvalidConfig(String),

    /// An entry arrived without an identity key
    #[error("Catalog entry at index {index} has no identity key")]
    MissingIdentityKey { index: usize },

    /// The same identity key appeared more than once in one run
    #[error("Identity key '{key}' appears {count} times in one comparison run")]
    DuplicateIdentityKey { key: String, count: usize },

    /// Catalog store query errors
    #[error("Catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Profile or report (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown profile name
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// A scanner thread failed to start or panicked
    #[error("Scanner thread failure: {0}")]
    ScannerSpawn(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
