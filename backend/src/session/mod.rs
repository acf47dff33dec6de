//! Import sessions - per-upload run state, optionally persisted to disk
//!
//! A session ties an uploaded file to the run that imports it. The run state
//! (watermark and counters) lives here between chunk requests.
//!
//! ```text
//! upload ──▶ ImportSession { file, run: None }
//! chunk 0 ──▶ run = Some(ImportRun { next_offset: 1, .. })
//! chunk n ──▶ next_offset = n + 1
//! last chunk ──▶ complete = true
//! ```
//!
//! Each session sits behind its own async mutex so chunk requests for the
//! same session run one after the other. With a directory configured, every
//! session is saved as `<key>.json` and reloaded on startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::models::{Encoding, ImportOptions};
use crate::parser::Dialect;
use crate::progress::ProgressTracker;

pub type SharedSession = Arc<Mutex<ImportSession>>;

/// Options that decide which rows an offset selects. Fixed for a run by
/// its first chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkGeometry {
    pub chunk_size: usize,
    pub first_row_titles: bool,
    pub dialect: Dialect,
    pub encoding: Option<Encoding>,
}

impl ChunkGeometry {
    pub fn new(options: &ImportOptions, dialect: Dialect) -> Self {
        Self {
            chunk_size: options.chunk_size,
            first_row_titles: options.first_row_titles,
            dialect,
            encoding: options.encoding,
        }
    }

    /// Wire name of the first setting that differs from `other`.
    pub fn first_difference(&self, other: &Self) -> Option<&'static str> {
        if self.chunk_size != other.chunk_size {
            Some("chunkSize")
        } else if self.first_row_titles != other.first_row_titles {
            Some("firstRowTitles")
        } else if self.dialect.delimiter != other.dialect.delimiter {
            Some("delimiter")
        } else if self.dialect.quote != other.dialect.quote {
            Some("enclosure")
        } else if self.dialect.escape != other.dialect.escape {
            Some("escape")
        } else if self.encoding != other.encoding {
            Some("encoding")
        } else {
            None
        }
    }
}

/// State of a started import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    /// Watermark: the next chunk offset this run accepts.
    pub next_offset: usize,
    pub geometry: ChunkGeometry,
    pub progress: ProgressTracker,
    pub complete: bool,
    pub started_at: DateTime<Utc>,
}

impl ImportRun {
    pub fn start(total_rows: usize, geometry: ChunkGeometry) -> Self {
        Self {
            next_offset: 0,
            geometry,
            progress: ProgressTracker::new(total_rows),
            complete: false,
            started_at: Utc::now(),
        }
    }
}

/// One uploaded file and its import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSession {
    pub key: String,
    pub file_path: Option<PathBuf>,
    /// Name the file was uploaded under.
    pub file_name: Option<String>,
    /// The file was uploaded to us and is deleted with the session.
    #[serde(default)]
    pub owns_file: bool,
    pub run: Option<ImportRun>,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
}

impl ImportSession {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            file_path: None,
            file_name: None,
            owns_file: false,
            run: None,
            created_at: now,
            touched_at: now,
        }
    }

    /// Random session key.
    pub fn generate_key() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn touch(&mut self) {
        self.touched_at = Utc::now();
    }

    /// Point the session at a file. Any previous run is discarded.
    pub fn attach_file(&mut self, path: impl Into<PathBuf>, file_name: Option<String>, owned: bool) {
        self.file_path = Some(path.into());
        self.file_name = file_name;
        self.owns_file = owned;
        self.run = None;
        self.touch();
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.touched_at).to_std().unwrap_or_default()
    }
}

/// Keys double as file names, so only a safe subset is persisted.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Registry of live sessions.
pub struct SessionStore {
    dir: Option<PathBuf>,
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl SessionStore {
    /// Sessions kept in memory only.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Sessions persisted under `dir`, loading the ones already there.
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let sessions = Self::load_all(&dir)
            .into_iter()
            .map(|s| (s.key.clone(), Arc::new(Mutex::new(s))))
            .collect();

        Self {
            dir: Some(dir),
            sessions: RwLock::new(sessions),
        }
    }

    fn load_all(dir: &Path) -> Vec<ImportSession> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut loaded = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match fs::read_to_string(&path)
                    .map_err(SessionError::from)
                    .and_then(|c| serde_json::from_str::<ImportSession>(&c).map_err(SessionError::from))
                {
                    Ok(session) => loaded.push(session),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session file"),
                }
            }
        }

        info!(count = loaded.len(), dir = %dir.display(), "sessions loaded");
        loaded
    }

    fn session_path(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{}.json", key)))
    }

    /// Register a session, replacing any session with the same key.
    pub async fn insert(&self, session: ImportSession) -> Result<SharedSession, SessionError> {
        self.persist(&session).await?;
        let key = session.key.clone();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(key, Arc::clone(&shared));
        Ok(shared)
    }

    /// New session over `path`.
    pub async fn open(&self, path: impl Into<PathBuf>, file_name: Option<String>, owned: bool) -> Result<String, SessionError> {
        let mut session = ImportSession::new(ImportSession::generate_key());
        session.attach_file(path, file_name, owned);
        let key = session.key.clone();
        self.insert(session).await?;
        Ok(key)
    }

    pub async fn get(&self, key: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Drop a session and its saved state. Waits for an in-flight chunk.
    pub async fn remove(&self, key: &str) -> Result<Option<ImportSession>, SessionError> {
        let shared = self.sessions.write().await.remove(key);
        let Some(shared) = shared else {
            return Ok(None);
        };

        let session = shared.lock().await.clone();
        self.delete_saved(key).await?;
        Ok(Some(session))
    }

    /// Save `session` when a directory is configured.
    pub async fn persist(&self, session: &ImportSession) -> Result<(), SessionError> {
        let Some(path) = self.session_path(&session.key) else {
            return Ok(());
        };
        if !is_safe_key(&session.key) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("session key '{}' cannot be persisted", session.key),
            )
            .into());
        }

        if let Some(dir) = &self.dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn delete_saved(&self, key: &str) -> Result<(), SessionError> {
        if let Some(path) = self.session_path(key) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove sessions idle longer than `ttl`. Sessions busy with a chunk are
    /// left alone.
    pub async fn purge_expired(&self, ttl: Duration) -> Vec<ImportSession> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        let expired: Vec<(String, ImportSession)> = sessions
            .iter()
            .filter_map(|(key, shared)| {
                let session = shared.try_lock().ok()?;
                (session.idle_for(now) > ttl).then(|| (key.clone(), session.clone()))
            })
            .collect();

        for (key, _) in &expired {
            sessions.remove(key);
        }
        drop(sessions);

        let mut removed = Vec::with_capacity(expired.len());
        for (key, session) in expired {
            if let Err(e) = self.delete_saved(&key).await {
                warn!(session = %key, error = %e, "failed to delete saved session");
            }
            removed.push(session);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Periodically purge idle sessions, deleting the uploads they own.
pub fn spawn_reaper(store: Arc<SessionStore>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            for session in store.purge_expired(ttl).await {
                debug!(session = %session.key, "session expired");
                if let (true, Some(path)) = (session.owns_file, &session.file_path) {
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        warn!(path = %path.display(), error = %e, "failed to delete upload");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn geometry(chunk_size: usize) -> ChunkGeometry {
        let options = ImportOptions { chunk_size, ..Default::default() };
        ChunkGeometry::new(&options, Dialect::default())
    }

    #[tokio::test]
    async fn test_open_and_get() {
        let store = SessionStore::in_memory();
        let key = store.open("/tmp/a.csv", Some("a.csv".into()), false).await.unwrap();

        let shared = store.get(&key).await.unwrap();
        let session = shared.lock().await;
        assert_eq!(session.file_path.as_deref(), Some(Path::new("/tmp/a.csv")));
        assert!(session.run.is_none());
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_attach_file_resets_run() {
        let mut session = ImportSession::new("k");
        session.run = Some(ImportRun::start(10, geometry(2)));
        session.attach_file("/tmp/b.csv", None, true);
        assert!(session.run.is_none());
        assert!(session.owns_file);
    }

    #[tokio::test]
    async fn test_persisted_sessions_reload() {
        let dir = TempDir::new().unwrap();
        let key = {
            let store = SessionStore::with_dir(dir.path());
            let key = store.open("/tmp/c.csv", None, false).await.unwrap();

            let shared = store.get(&key).await.unwrap();
            let mut session = shared.lock().await;
            let mut run = ImportRun::start(4, geometry(2));
            run.next_offset = 2;
            run.progress.record_created();
            session.run = Some(run);
            store.persist(&session).await.unwrap();
            key
        };

        let reloaded = SessionStore::with_dir(dir.path());
        let shared = reloaded.get(&key).await.unwrap();
        let session = shared.lock().await;
        let run = session.run.as_ref().unwrap();
        assert_eq!(run.next_offset, 2);
        assert_eq!(run.geometry, geometry(2));
        assert_eq!(run.progress.snapshot().created, 1);
    }

    #[test]
    fn test_geometry_difference_names_setting() {
        let base = geometry(2);
        assert_eq!(base.first_difference(&geometry(2)), None);
        assert_eq!(base.first_difference(&geometry(3)), Some("chunkSize"));

        let no_titles = ChunkGeometry { first_row_titles: false, ..geometry(2) };
        assert_eq!(base.first_difference(&no_titles), Some("firstRowTitles"));

        let semicolon = ChunkGeometry {
            dialect: Dialect { delimiter: b';', ..Dialect::default() },
            ..geometry(2)
        };
        assert_eq!(base.first_difference(&semicolon), Some("delimiter"));

        let latin = ChunkGeometry { encoding: Some(Encoding::Iso8859_1), ..geometry(2) };
        assert_eq!(base.first_difference(&latin), Some("encoding"));
    }

    #[tokio::test]
    async fn test_remove_deletes_saved_file() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path());
        let key = store.open("/tmp/d.csv", None, false).await.unwrap();
        assert!(dir.path().join(format!("{}.json", key)).exists());

        let removed = store.remove(&key).await.unwrap();
        assert_eq!(removed.map(|s| s.key), Some(key.clone()));
        assert!(!dir.path().join(format!("{}.json", key)).exists());
        assert!(store.remove(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsafe_key_not_persisted() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path());
        assert!(store.insert(ImportSession::new("../escape")).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired_skips_fresh_and_busy() {
        let store = SessionStore::in_memory();

        let mut stale = ImportSession::new("stale");
        stale.touched_at = Utc::now() - chrono::Duration::hours(2);
        store.insert(stale).await.unwrap();

        let mut busy = ImportSession::new("busy");
        busy.touched_at = Utc::now() - chrono::Duration::hours(2);
        let busy = store.insert(busy).await.unwrap();
        let _guard = busy.lock().await;

        store.insert(ImportSession::new("fresh")).await.unwrap();

        let removed = store.purge_expired(Duration::from_secs(3600)).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].key, "stale");
        assert_eq!(store.len().await, 2);
    }
}
