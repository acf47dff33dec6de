//! HTTP Server for the chunkload API.
//!
//! The browser uploads a file, confirms the column mapping, then posts one
//! chunk request after another until progress reaches 100%.
//!
//! # API Endpoints
//!
//! | Method | Path                                      | Description                    |
//! |--------|-------------------------------------------|--------------------------------|
//! | GET    | `/health`                                 | Health check                   |
//! | GET    | `/api/encodings`                          | Supported source encodings     |
//! | POST   | `/api/upload`                             | Upload CSV, open a session     |
//! | GET    | `/api/import/{session}/columns`           | Headers, fields, auto-match    |
//! | GET    | `/api/import/{session}/columns/{i}/sample`| Sample values of column `i`    |
//! | POST   | `/api/import/{session}/chunk`             | Process one chunk              |
//! | GET    | `/api/import/{session}/progress`          | Counters and per-row messages  |
//! | DELETE | `/api/import/{session}`                   | Discard the session            |
//! | GET    | `/api/import-logs`                        | Import run log                 |
//! | GET    | `/api/logs`                               | SSE stream of import events    |

use axum::{
    extract::{Multipart, Path as UrlPath, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use super::logs::LOG_BROADCASTER;
use super::types::{
    error_response, ChunkRequest, ChunkResponse, ColumnsResponse, SampleResponse, UploadResponse,
};
use crate::config::AppConfig;
use crate::error::{CsvError, ImportError, ServerError, ServerResult, StoreError};
use crate::import::Importer;
use crate::models::{Encoding, FieldName, ImportLogEntry, ImportOptions};
use crate::parser::{decode_content, detect_delimiter, detect_encoding, ChunkReader};
use crate::progress::ImportReport;
use crate::reconcile::ProductsImport;
use crate::session::{spawn_reaper, SessionStore};
use crate::transform::ColumnMatcher;

const SAMPLE_LIMIT: usize = 10;

/// Product and run-log tables, next to the saved sessions.
const STORE_SUBDIR: &str = "store";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub importer: Importer,
    pub upload_dir: PathBuf,
    pub chunk_size: usize,
}

// =============================================================================
// Error responses
// =============================================================================

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Import(err) => match err {
                ImportError::Csv(CsvError::Resource { .. }) => StatusCode::NOT_FOUND,
                ImportError::Csv(CsvError::Dialect(_)) => StatusCode::BAD_REQUEST,
                ImportError::Csv(CsvError::Parse { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
                ImportError::Mapping(_) => StatusCode::BAD_REQUEST,
                ImportError::InvalidChunkSize => StatusCode::BAD_REQUEST,
                ImportError::OffsetOutOfOrder { .. } => StatusCode::CONFLICT,
                ImportError::OptionsChanged { .. } => StatusCode::CONFLICT,
                ImportError::UnknownSession(_) => StatusCode::NOT_FOUND,
                ImportError::NoSourceFile(_) => StatusCode::CONFLICT,
                ImportError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
                ImportError::Store(_) | ImportError::Session(_) | ImportError::ReaderTask(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}

fn internal(e: impl std::fmt::Display) -> ServerError {
    ServerError::Internal(e.to_string())
}

// =============================================================================
// Server
// =============================================================================

/// Build the router over `state`
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/encodings", get(encodings))
        .route("/api/upload", post(upload_csv))
        .route("/api/import/{session}", axum::routing::delete(discard_session))
        .route("/api/import/{session}/columns", get(columns))
        .route("/api/import/{session}/columns/{index}/sample", get(column_sample))
        .route("/api/import/{session}/chunk", post(process_chunk))
        .route("/api/import/{session}/progress", get(progress))
        .route("/api/import-logs", get(import_logs))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (sessions, target) = match &config.session_dir {
        Some(dir) => (
            SessionStore::with_dir(dir),
            ProductsImport::with_dir(dir.join(STORE_SUBDIR))?,
        ),
        None => (SessionStore::in_memory(), ProductsImport::in_memory()),
    };
    let sessions = Arc::new(sessions);
    spawn_reaper(Arc::clone(&sessions), config.session_ttl, config.reap_interval);

    let importer = Importer::new(sessions, Arc::new(target));
    let app = router(AppState {
        importer,
        upload_dir: config.upload_dir.clone(),
        chunk_size: config.chunk_size,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, upload_dir = %config.upload_dir.display(), "chunkload server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "chunkload",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn encodings() -> Json<Vec<&'static str>> {
    Json(Encoding::ALL.iter().map(Encoding::label).collect())
}

/// SSE endpoint for import events
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Run file reads on the blocking pool.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(ImportError::from)?
}

fn describe_columns(path: &Path, options: &ImportOptions, fields: Vec<FieldName>) -> ServerResult<ColumnsResponse> {
    let reader = ChunkReader::open(path, options).map_err(ImportError::from)?;
    let headers = reader.read_headers().map_err(ImportError::from)?;
    let total_rows = reader.count_rows().map_err(ImportError::from)?;

    let mut matcher = ColumnMatcher::new(headers, fields);
    matcher.auto_match();

    Ok(ColumnsResponse {
        file_columns: matcher.file_columns().to_vec(),
        db_columns: matcher.db_columns().to_vec(),
        mapping: matcher.into_mapping(),
        total_rows,
    })
}

async fn session_file(state: &AppState, key: &str) -> ServerResult<PathBuf> {
    let shared = state
        .importer
        .sessions()
        .get(key)
        .await
        .ok_or_else(|| ImportError::UnknownSession(key.to_string()))?;
    let session = shared.lock().await;
    session
        .file_path
        .clone()
        .ok_or_else(|| ImportError::NoSourceFile(key.to_string()).into())
}

fn single_char(name: &str, value: &str) -> ServerResult<Option<char>> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(None),
        (Some(c), None) => Ok(Some(c)),
        _ => Err(ServerError::BadRequest(format!("{} must be a single character", name))),
    }
}

/// Upload CSV endpoint
///
/// Multipart fields: `file` (required), `delimiter`, `encoding`,
/// `firstRowTitles`.
async fn upload_csv(State(state): State<AppState>, mut multipart: Multipart) -> ServerResult<Json<UploadResponse>> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut options = ImportOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            file_name = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?
                    .to_vec(),
            );
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
        match name.as_str() {
            "delimiter" => options.delimiter = single_char("delimiter", &value)?,
            "encoding" if !value.trim().is_empty() => {
                options.encoding = Some(value.parse().map_err(ServerError::BadRequest)?)
            }
            "firstRowTitles" => options.first_row_titles = matches!(value.trim(), "1" | "true" | "on"),
            _ => {}
        }
    }

    let bytes = file_data.ok_or_else(|| ServerError::BadRequest("No file provided".into()))?;

    let detected_encoding = detect_encoding(&bytes);
    let detected_delimiter = detect_delimiter(&decode_content(&bytes, options.encoding));
    options.delimiter.get_or_insert(detected_delimiter);

    tokio::fs::create_dir_all(&state.upload_dir).await.map_err(internal)?;
    let path = state.upload_dir.join(format!("{}.csv", Uuid::new_v4()));
    tokio::fs::write(&path, &bytes).await.map_err(internal)?;

    let sessions = state.importer.sessions();
    let session_key = sessions
        .open(&path, file_name.clone(), true)
        .await
        .map_err(ImportError::from)?;

    let fields = state.importer.target().fields();
    let described = {
        let path = path.clone();
        blocking(move || describe_columns(&path, &options, fields)).await
    };
    let columns = match described {
        Ok(columns) => columns,
        Err(e) => {
            sessions.remove(&session_key).await.map_err(ImportError::from)?;
            tokio::fs::remove_file(&path).await.ok();
            return Err(e);
        }
    };

    info!(
        session = %session_key,
        file = file_name.as_deref().unwrap_or("unknown"),
        bytes = bytes.len(),
        rows = columns.total_rows,
        "file uploaded"
    );

    Ok(Json(UploadResponse {
        session_key,
        file_name,
        detected_encoding,
        detected_delimiter: detected_delimiter.to_string(),
        chunk_size: state.chunk_size,
        columns,
    }))
}

async fn columns(
    State(state): State<AppState>,
    UrlPath(key): UrlPath<String>,
    Query(options): Query<ImportOptions>,
) -> ServerResult<Json<ColumnsResponse>> {
    let path = session_file(&state, &key).await?;
    let fields = state.importer.target().fields();
    Ok(Json(blocking(move || describe_columns(&path, &options, fields)).await?))
}

async fn column_sample(
    State(state): State<AppState>,
    UrlPath((key, index)): UrlPath<(String, usize)>,
    Query(options): Query<ImportOptions>,
) -> ServerResult<Json<SampleResponse>> {
    let path = session_file(&state, &key).await?;
    let values = blocking(move || {
        let reader = ChunkReader::open(&path, &options).map_err(ImportError::from)?;
        Ok(reader.column_sample(index, SAMPLE_LIMIT).map_err(ImportError::from)?)
    })
    .await?;
    Ok(Json(SampleResponse { column: index, values }))
}

async fn process_chunk(
    State(state): State<AppState>,
    UrlPath(key): UrlPath<String>,
    Json(request): Json<ChunkRequest>,
) -> ServerResult<Json<ChunkResponse>> {
    let mapping = request.resolve_mapping().map_err(ImportError::from)?;
    let options = ImportOptions {
        session_key: key.clone(),
        ..request.options.clone()
    };

    let import_results = state.importer.process_chunk(request.offset, &mapping, &options).await?;
    let complete = state.importer.is_complete(&key).await?;

    Ok(Json(ChunkResponse {
        session_key: key,
        offset: request.offset,
        complete,
        import_results,
    }))
}

async fn progress(
    State(state): State<AppState>,
    UrlPath(key): UrlPath<String>,
) -> ServerResult<Json<ImportReport>> {
    state
        .importer
        .report(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("Import for session {} has not started", key)))
}

async fn discard_session(
    State(state): State<AppState>,
    UrlPath(key): UrlPath<String>,
) -> ServerResult<Json<Value>> {
    let session = state
        .importer
        .sessions()
        .remove(&key)
        .await
        .map_err(ImportError::from)?
        .ok_or_else(|| ImportError::UnknownSession(key.clone()))?;

    if let (true, Some(path)) = (session.owns_file, &session.file_path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to delete upload");
        }
    }

    Ok(Json(json!({ "status": "deleted", "sessionKey": key })))
}

async fn import_logs(State(state): State<AppState>) -> ServerResult<Json<Vec<ImportLogEntry>>> {
    Ok(Json(state.importer.runs().await?))
}
