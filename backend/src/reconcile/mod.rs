//! Reconciliation of mapped rows against a destination store.
//!
//! ```text
//! ImportRecord ──▶ key field ──▶ find_by_key ──┬─ found ────▶ update ──▶ updated += 1
//!                                              ├─ NotFound ─▶ create ──▶ created += 1
//!                                              └─ other ─────────────▶ errors[row]
//! ```
//!
//! A failing row is recorded and the batch moves on; nothing here aborts a
//! chunk.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::models::{FieldName, ImportLogEntry, ImportRecord};
use crate::progress::ProgressTracker;
use crate::store::{DestinationStore, ImportTarget, LogStore, MemoryLogStore, MemoryProductStore};

/// Outcome of reconciling one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
}

/// Generic upsert-by-natural-key engine for one entity type.
pub struct Reconciler<S, L> {
    store: S,
    logs: L,
}

/// Product import: SKU lookup, in-memory tables.
pub type ProductsImport = Reconciler<MemoryProductStore, MemoryLogStore>;

impl<S: DestinationStore, L: LogStore> Reconciler<S, L> {
    pub fn new(store: S, logs: L) -> Self {
        Self { store, logs }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn logs(&self) -> &L {
        &self.logs
    }

    /// Upsert one record by its natural key.
    pub async fn reconcile_one(&self, record: &ImportRecord) -> StoreResult<Outcome> {
        let key_field = self.store.key_field();
        let key = record
            .text(key_field)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StoreError::Validation(format!("missing natural key '{}'", key_field)))?;

        match self.store.find_by_key(key).await {
            Ok(entity) => {
                self.store.update(entity, record).await?;
                Ok(Outcome::Updated)
            }
            Err(StoreError::NotFound(_)) => {
                self.store.create(record).await?;
                Ok(Outcome::Created)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<S: DestinationStore, L: LogStore> ImportTarget for Reconciler<S, L> {
    fn fields(&self) -> Vec<FieldName> {
        self.store.fields()
    }

    async fn log_run(&self, author: Option<&str>, file_path: &Path) -> StoreResult<()> {
        let entry = self.logs.create_run_record(author, file_path).await?;
        debug!(log_id = entry.id, file = %file_path.display(), "import run logged");
        Ok(())
    }

    async fn apply_records(&self, records: Vec<(usize, ImportRecord)>, progress: &mut ProgressTracker) {
        for (row, record) in records {
            if record.iter().all(|(_, value)| value.is_blank()) {
                progress.record_skipped(row, "no values in mapped columns");
                continue;
            }

            match self.reconcile_one(&record).await {
                Ok(Outcome::Created) => progress.record_created(),
                Ok(Outcome::Updated) => progress.record_updated(),
                Err(e) => {
                    warn!(row, error = %e, "row rejected");
                    progress.record_error(row, e.to_string());
                }
            }
        }
    }

    async fn runs(&self) -> StoreResult<Vec<ImportLogEntry>> {
        self.logs.list().await
    }
}

impl ProductsImport {
    /// Product import over empty in-memory tables.
    pub fn in_memory() -> Self {
        Self::new(MemoryProductStore::new(), MemoryLogStore::new())
    }

    /// Product import whose tables are saved under `dir` and reloaded from
    /// it.
    pub fn with_dir(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        Ok(Self::new(
            MemoryProductStore::with_file(dir.join("products.json"))?,
            MemoryLogStore::with_file(dir.join("import-logs.json"))?,
        ))
    }
}
