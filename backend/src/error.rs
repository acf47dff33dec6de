//! Error types for the chunked import pipeline.
//!
//! This module defines one error enum per layer:
//!
//! - [`CsvError`] - Source file and dialect errors (fatal for a chunk)
//! - [`MappingError`] - Column mapping errors
//! - [`StoreError`] - Destination/log store errors (row-level, except `NotFound`)
//! - [`ImportError`] - Top-level orchestration errors
//! - [`ConfigError`] - Environment configuration errors
//! - [`ServerError`] - HTTP layer errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// CSV Source Errors
// =============================================================================

/// Errors raised while opening or parsing the CSV source.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Source file missing or unreadable.
    #[error("Cannot read source file '{path}': {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid dialect override (delimiter, enclosure or escape).
    #[error("Invalid CSV dialect: {0}")]
    Dialect(String),

    /// Record could not be parsed.
    #[error("Invalid CSV format at row {row}: {message}")]
    Parse { row: usize, message: String },
}

impl CsvError {
    pub fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source,
        }
    }
}

// =============================================================================
// Mapping Errors
// =============================================================================

/// Errors in the column mapping handed to the engine.
#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    /// No column is mapped to any field.
    #[error("Column mapping is empty")]
    Empty,

    /// A form key was not a column index.
    #[error("Invalid column index '{0}'")]
    InvalidIndex(String),

    /// A column index is beyond the file's header row.
    #[error("Column {index} does not exist (file has {columns} columns)")]
    UnknownColumn { index: usize, columns: usize },

    /// A field the destination does not have.
    #[error("Unknown destination field '{0}'")]
    UnknownField(String),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the destination and log stores.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Natural-key lookup found nothing. Drives the create path.
    #[error("No entity with key '{0}'")]
    NotFound(String),

    /// Record failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage constraint violated (e.g. duplicate key).
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// Backend failure, e.g. the table file cannot be written.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Import Errors (top-level)
// =============================================================================

/// Top-level errors returned by [`crate::import::Importer::process_chunk`].
///
/// Any of these aborts the chunk before a row is reconciled. Row-level
/// failures never surface here; they are counted in the progress instead.
#[derive(Debug, Error)]
pub enum ImportError {
    /// CSV source error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Mapping error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Store error outside row reconciliation (e.g. run log).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Chunk size must be positive.
    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    /// Offset skipped ahead of the session watermark.
    #[error("Offset {got} is out of order, expected {expected}")]
    OffsetOutOfOrder { expected: usize, got: usize },

    /// Chunk options differ from the ones the run started with.
    #[error("Option '{setting}' differs from the one this import started with")]
    OptionsChanged { setting: &'static str },

    /// Session key unknown or expired.
    #[error("Unknown import session: {0}")]
    UnknownSession(String),

    /// Session has no uploaded file attached.
    #[error("No source file attached to session {0}")]
    NoSourceFile(String),

    /// Session persistence failure.
    #[error("Session store error: {0}")]
    Session(#[from] SessionError),

    /// The blocking reader task panicked or was cancelled.
    #[error("Reader task failed: {0}")]
    ReaderTask(#[from] tokio::task::JoinError),
}

// =============================================================================
// Session Errors
// =============================================================================

/// Errors persisting session state to disk.
#[derive(Debug, Error)]
pub enum SessionError {
    /// IO error.
    #[error("Session IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error.
    #[error("Session JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable present but not parseable.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Import error.
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
