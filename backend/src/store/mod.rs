//! Store capabilities consumed by the import engine.
//!
//! - [`DestinationStore`] - natural-key lookup, create and update of entities
//! - [`LogStore`] - one record per import run
//! - [`ImportTarget`] - what the orchestrator drives: log a run, apply records
//!
//! In-memory implementations live in [`memory`]; a database-backed store
//! implements the same traits.

pub mod memory;
pub mod product;

use async_trait::async_trait;
use std::path::Path;

use crate::error::StoreResult;
use crate::models::{FieldName, ImportLogEntry, ImportRecord};
use crate::progress::ProgressTracker;

pub use memory::{MemoryLogStore, MemoryProductStore};

/// Destination entities identified by a natural key.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    type Entity: Send + Sync;

    /// Record field holding the natural key.
    fn key_field(&self) -> &str;

    /// Fields a mapping may target.
    fn fields(&self) -> Vec<FieldName>;

    /// `Err(StoreError::NotFound)` when no entity has `key`.
    async fn find_by_key(&self, key: &str) -> StoreResult<Self::Entity>;

    async fn create(&self, record: &ImportRecord) -> StoreResult<Self::Entity>;

    /// Merge `record` into `entity` and persist it.
    async fn update(&self, entity: Self::Entity, record: &ImportRecord) -> StoreResult<Self::Entity>;
}

/// Import run log.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn create_run_record(&self, author: Option<&str>, file_path: &Path) -> StoreResult<ImportLogEntry>;

    /// Entries, newest first.
    async fn list(&self) -> StoreResult<Vec<ImportLogEntry>>;
}

/// One importable entity type, as seen by the orchestrator.
#[async_trait]
pub trait ImportTarget: Send + Sync {
    /// Destination fields offered to the column matcher.
    fn fields(&self) -> Vec<FieldName>;

    /// Record who imported which file. Called once per run.
    async fn log_run(&self, author: Option<&str>, file_path: &Path) -> StoreResult<()>;

    /// Reconcile `records` (paired with their data-row index) and count
    /// each outcome in `progress`. Row failures never abort the batch.
    async fn apply_records(&self, records: Vec<(usize, ImportRecord)>, progress: &mut ProgressTracker);

    /// Past runs.
    async fn runs(&self) -> StoreResult<Vec<ImportLogEntry>>;
}
