//! Running import counters.
//!
//! [`ProgressTracker`] is the mutable state a session carries between chunk
//! requests. [`ImportProgress`] is the view derived from it on every call;
//! nothing in the view is cached.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-row messages, keyed by data-row index.
pub type RowMessages = BTreeMap<usize, Vec<String>>;

/// Counters accumulated over one import run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTracker {
    total_rows: usize,
    created: usize,
    updated: usize,
    #[serde(default)]
    errors: RowMessages,
    #[serde(default)]
    warnings: RowMessages,
    #[serde(default)]
    skipped: RowMessages,
}

impl ProgressTracker {
    /// Fresh counters for a run of `total_rows` data rows.
    pub fn new(total_rows: usize) -> Self {
        Self {
            total_rows,
            ..Default::default()
        }
    }

    pub fn record_created(&mut self) {
        self.created += 1;
    }

    pub fn record_updated(&mut self) {
        self.updated += 1;
    }

    pub fn record_error(&mut self, row: usize, message: impl Into<String>) {
        self.errors.entry(row).or_default().push(message.into());
    }

    pub fn record_warning(&mut self, row: usize, message: impl Into<String>) {
        self.warnings.entry(row).or_default().push(message.into());
    }

    pub fn record_skipped(&mut self, row: usize, message: impl Into<String>) {
        self.skipped.entry(row).or_default().push(message.into());
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// `created + updated + |errors| + |warnings| + |skipped|`.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.errors.len() + self.warnings.len() + self.skipped.len()
    }

    /// Percentage of rows processed. An empty run is complete.
    pub fn progress(&self) -> f64 {
        if self.total_rows == 0 {
            return 100.0;
        }
        (self.processed() as f64 / self.total_rows as f64 * 100.0).min(100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.processed() >= self.total_rows
    }

    pub fn errors(&self) -> &RowMessages {
        &self.errors
    }

    pub fn warnings(&self) -> &RowMessages {
        &self.warnings
    }

    pub fn skipped(&self) -> &RowMessages {
        &self.skipped
    }

    /// Counters and percentage, recomputed now.
    pub fn snapshot(&self) -> ImportProgress {
        let error_count = self.errors.len();
        let warning_count = self.warnings.len();
        let skipped_count = self.skipped.len();

        ImportProgress {
            total_rows: self.total_rows,
            processed: self.processed(),
            created: self.created,
            updated: self.updated,
            error_count,
            warning_count,
            skipped_count,
            progress: self.progress(),
            has_messages: error_count > 0 || warning_count > 0 || skipped_count > 0,
        }
    }

    /// Snapshot plus every per-row message, for the operator review.
    pub fn report(&self) -> ImportReport {
        ImportReport {
            progress: self.snapshot(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            skipped: self.skipped.clone(),
        }
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} rows: {} created, {} updated, {} errors, {} warnings, {} skipped",
            self.processed(),
            self.total_rows,
            self.created,
            self.updated,
            self.errors.len(),
            self.warnings.len(),
            self.skipped.len()
        )
    }
}

/// Progress view returned after every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub total_rows: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub skipped_count: usize,
    /// 0.0 to 100.0
    pub progress: f64,
    pub has_messages: bool,
}

impl ImportProgress {
    pub fn is_complete(&self) -> bool {
        self.processed >= self.total_rows
    }
}

/// Snapshot with the per-row messages attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    #[serde(flatten)]
    pub progress: ImportProgress,
    pub errors: RowMessages,
    pub warnings: RowMessages,
    pub skipped: RowMessages,
}
