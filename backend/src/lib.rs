//! # Chunkload - chunked CSV import into a catalogue
//!
//! Chunkload imports large CSV files into a destination store a bounded slice
//! at a time. The client asks for one chunk per request and keeps asking until
//! progress reaches 100%.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │ CSV file │──▶│ ChunkReader │──▶│ RowMapper │──▶│ Reconciler │──▶│  Store   │
//! │ (any enc)│   │ (offset, n) │   │ (mapping) │   │ (by key)   │   │ (upsert) │
//! └──────────┘   └─────────────┘   └───────────┘   └─────┬──────┘   └──────────┘
//!                                                        ▼
//!                                              ProgressTracker (per session)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chunkload::{ColumnMapping, ImportOptions, Importer, ProductsImport, SessionStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sessions = Arc::new(SessionStore::in_memory());
//!     let key = sessions.open("products.csv", None, false).await.unwrap();
//!     let importer = Importer::new(sessions, Arc::new(ProductsImport::in_memory()));
//!
//!     let mapping = ColumnMapping::new().with(0, "sku").with(1, "name").with(2, "price");
//!     let options = ImportOptions { session_key: key, ..Default::default() };
//!     let done = importer.drive(&mapping, &options, |_, _| {}).await.unwrap();
//!     println!("{}% imported", done.progress);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Mapping, options, records, entities
//! - [`parser`] - Chunked CSV reading with dialect and encoding handling
//! - [`transform`] - Column matching and row mapping
//! - [`validation`] - Product row schema
//! - [`store`] - Destination and log store traits, in-memory stores
//! - [`reconcile`] - Upsert by natural key
//! - [`progress`] - Import counters
//! - [`session`] - Per-upload run state
//! - [`import`] - Chunk orchestration
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;

// Reading and mapping
pub mod parser;
pub mod transform;
pub mod validation;

// Import engine
pub mod import;
pub mod progress;
pub mod reconcile;
pub mod session;
pub mod store;

// Ambient
pub mod config;
pub mod telemetry;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, CsvError, ImportError, MappingError, ServerError, SessionError, StoreError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    ColumnMapping, DecodeStrategy, Encoding, FieldName, FieldValue, ImportLogEntry,
    ImportOptions, ImportRecord, Product,
};

// =============================================================================
// Re-exports - Engine
// =============================================================================

pub use import::Importer;
pub use parser::{read_chunk, ChunkReader, Dialect};
pub use progress::{ImportProgress, ImportReport, ProgressTracker};
pub use reconcile::{ProductsImport, Reconciler};
pub use session::{ImportSession, SessionStore};
pub use store::{DestinationStore, ImportTarget, LogStore, MemoryLogStore, MemoryProductStore};
pub use transform::{decode_multi_value, encode_multi_value, map_row, ColumnMatcher};

// =============================================================================
// Re-exports - Config
// =============================================================================

pub use config::AppConfig;

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
