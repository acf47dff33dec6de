//! Import orchestration - one chunk per call
//!
//! ```text
//! process_chunk(offset)
//!      │
//!      ├─ session lookup + lock (one chunk at a time per session)
//!      ├─ watermark check ── offset < next ──▶ replay: current snapshot
//!      │                  └─ offset > next ──▶ OffsetOutOfOrder
//!      ├─ options differ from the run's ──▶ OptionsChanged
//!      ├─ offset 0 ──▶ count rows, log run, start counters
//!      ├─ ChunkReader::read_chunk ──▶ map_rows ──▶ ImportTarget::apply_records
//!      └─ persist session, return snapshot
//! ```
//!
//! The client drives the loop: it calls again with `offset + 1` until the
//! snapshot reports 100%. [`Importer::drive`] runs the same loop locally.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::logs::{log_error, log_info, log_success, log_warning};
use crate::error::{ImportError, ImportResult, MappingError};
use crate::models::{ColumnMapping, ImportLogEntry, ImportOptions};
use crate::parser::ChunkReader;
use crate::progress::{ImportProgress, ImportReport};
use crate::session::{ChunkGeometry, ImportRun, SessionStore};
use crate::store::ImportTarget;
use crate::transform::map_rows;

/// Runs chunked imports of session files into one target.
#[derive(Clone)]
pub struct Importer {
    sessions: Arc<SessionStore>,
    target: Arc<dyn ImportTarget>,
}

impl Importer {
    pub fn new(sessions: Arc<SessionStore>, target: Arc<dyn ImportTarget>) -> Self {
        Self { sessions, target }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn target(&self) -> &Arc<dyn ImportTarget> {
        &self.target
    }

    /// Reject empty mappings and fields the target does not have.
    pub fn check_mapping(&self, mapping: &ColumnMapping) -> Result<(), MappingError> {
        mapping.validate(None)?;
        let known = self.target.fields();
        match mapping.destination_fields().into_iter().find(|f| !known.contains(f)) {
            Some(unknown) => Err(MappingError::UnknownField(unknown.to_string())),
            None => Ok(()),
        }
    }

    /// Process chunk `offset` of the session named in `options`.
    ///
    /// Replayed offsets return the current snapshot without touching the
    /// store. Offsets past the watermark are rejected, as are chunk options
    /// that differ from the ones the run started with.
    pub async fn process_chunk(
        &self,
        offset: usize,
        mapping: &ColumnMapping,
        options: &ImportOptions,
    ) -> ImportResult<ImportProgress> {
        let result = self.run_chunk(offset, mapping, options).await;
        if let Err(e) = &result {
            log_error(&options.session_key, format!("Chunk {} failed: {}", offset, e));
        }
        result
    }

    async fn run_chunk(
        &self,
        offset: usize,
        mapping: &ColumnMapping,
        options: &ImportOptions,
    ) -> ImportResult<ImportProgress> {
        if options.chunk_size == 0 {
            return Err(ImportError::InvalidChunkSize);
        }
        self.check_mapping(mapping)?;

        let options = options.at_offset(offset);
        let key = options.session_key.clone();
        let shared = self
            .sessions
            .get(&key)
            .await
            .ok_or_else(|| ImportError::UnknownSession(key.clone()))?;
        let mut session = shared.lock().await;
        session.touch();

        match &session.run {
            Some(run) if run.complete || offset < run.next_offset => {
                debug!(session = %key, offset, next = run.next_offset, "replayed chunk");
                let snapshot = run.progress.snapshot();
                self.sessions.persist(&session).await?;
                return Ok(snapshot);
            }
            Some(run) if offset > run.next_offset => {
                return Err(ImportError::OffsetOutOfOrder {
                    expected: run.next_offset,
                    got: offset,
                });
            }
            None if offset != 0 => {
                return Err(ImportError::OffsetOutOfOrder { expected: 0, got: offset });
            }
            _ => {}
        }

        let path: PathBuf = session
            .file_path
            .clone()
            .ok_or_else(|| ImportError::NoSourceFile(key.clone()))?;
        let reader = ChunkReader::open(&path, &options)?;
        let geometry = ChunkGeometry::new(&options, reader.dialect());
        if let Some(setting) = session
            .run
            .as_ref()
            .and_then(|run| run.geometry.first_difference(&geometry))
        {
            return Err(ImportError::OptionsChanged { setting });
        }

        let started = session.run.is_some();
        let read_options = options.clone();
        let (total_rows, rows) = tokio::task::spawn_blocking(move || {
            if started {
                reader.read_chunk(&read_options).map(|rows| (None, rows))
            } else {
                reader
                    .read_chunk_with_total(&read_options)
                    .map(|(total, rows)| (Some(total), rows))
            }
        })
        .await??;

        let mut run = match session.run.clone() {
            Some(run) => run,
            None => {
                let total_rows = total_rows.unwrap_or_default();
                self.target.log_run(options.author.as_deref(), &path).await?;
                info!(session = %key, total_rows, file = %path.display(), "import started");
                log_info(&key, format!("Importing {} rows", total_rows));
                ImportRun::start(total_rows, geometry)
            }
        };

        if rows.is_empty() {
            run.complete = true;
        } else {
            let count = rows.len();
            let records = map_rows(rows, mapping, options.first_data_row());
            self.target.apply_records(records, &mut run.progress).await;
            debug!(session = %key, offset, rows = count, "chunk applied");
        }

        run.next_offset = offset + 1;
        run.complete |= run.progress.is_complete();
        let snapshot = run.progress.snapshot();

        if run.complete {
            if snapshot.has_messages {
                log_warning(&key, format!("Import finished with messages: {}", run.progress.summary()));
            } else {
                log_success(&key, format!("Import finished: {}", run.progress.summary()));
            }
        }

        session.run = Some(run);
        self.sessions.persist(&session).await?;
        Ok(snapshot)
    }

    /// Run every chunk from the session's watermark until the import is
    /// complete, calling `on_chunk` after each one.
    pub async fn drive<F>(
        &self,
        mapping: &ColumnMapping,
        options: &ImportOptions,
        mut on_chunk: F,
    ) -> ImportResult<ImportProgress>
    where
        F: FnMut(usize, &ImportProgress),
    {
        let mut offset = self.watermark(&options.session_key).await?;
        loop {
            let snapshot = self.process_chunk(offset, mapping, options).await?;
            on_chunk(offset, &snapshot);
            if self.is_complete(&options.session_key).await? {
                return Ok(snapshot);
            }
            offset += 1;
        }
    }

    async fn watermark(&self, key: &str) -> ImportResult<usize> {
        let shared = self
            .sessions
            .get(key)
            .await
            .ok_or_else(|| ImportError::UnknownSession(key.to_string()))?;
        let session = shared.lock().await;
        Ok(session.run.as_ref().map_or(0, |r| r.next_offset))
    }

    /// The session's run has read its last chunk.
    pub async fn is_complete(&self, key: &str) -> ImportResult<bool> {
        let shared = self
            .sessions
            .get(key)
            .await
            .ok_or_else(|| ImportError::UnknownSession(key.to_string()))?;
        let session = shared.lock().await;
        Ok(session.run.as_ref().is_some_and(|r| r.complete))
    }

    /// Counters and per-row messages of the session's run. `None` before
    /// the first chunk.
    pub async fn report(&self, key: &str) -> ImportResult<Option<ImportReport>> {
        let shared = self
            .sessions
            .get(key)
            .await
            .ok_or_else(|| ImportError::UnknownSession(key.to_string()))?;
        let session = shared.lock().await;
        Ok(session.run.as_ref().map(|r| r.progress.report()))
    }

    pub async fn runs(&self) -> ImportResult<Vec<ImportLogEntry>> {
        Ok(self.target.runs().await?)
    }
}
