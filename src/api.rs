//! HTTP surface of the gateway.
//!
//! Handlers return `Result<(StatusCode, Json<Value>), ApiError>`; every
//! failure renders as `{"detail": ...}` through the error taxonomy.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Form, Json, Router,
};
use axum_extra::extract::Multipart;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::config::{DEFAULT_KNOWLEDGE_BASE, MAX_UPLOAD_BYTES};
use crate::error::ApiError;
use crate::ingest::{IngestRunner, StartOutcome};
use crate::store::FileStore;
use crate::structures::{FileRecord, QueryMode};
use crate::upstream::RetrievalBackend;

/// Shared handles for every route.
#[derive(Clone)]
pub struct AppState {
    pub store: FileStore,
    pub runner: IngestRunner,
    pub backend: Arc<dyn RetrievalBackend>,
}

impl AppState {
    pub fn new(store: FileStore, backend: Arc<dyn RetrievalBackend>) -> Self {
        let runner = IngestRunner::new(store.clone(), Arc::clone(&backend));
        Self {
            store,
            runner,
            backend,
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/knowledge-bases",
            get(list_knowledge_bases).post(create_knowledge_base),
        )
        .route("/api/files", get(list_files))
        .route("/api/upload", post(upload_files))
        .route("/api/parse", post(start_parse))
        .route("/api/files/reset-all", post(reset_all_files))
        .route("/api/files/:file_key/status", get(file_status))
        .route("/api/files/:file_key/reset", post(reset_file))
        .route("/api/files/:file_key", delete(delete_file))
        .route("/api/query", post(run_query))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

fn default_kb() -> String {
    DEFAULT_KNOWLEDGE_BASE.to_string()
}

fn default_mode() -> String {
    QueryMode::default().as_str().to_string()
}

/// One record in the wire shape clients expect.
fn file_json(record: &FileRecord) -> Value {
    json!({
        "filename": record.original_name,
        "safe_filename": record.safe_key,
        "knowledge_base": record.knowledge_base,
        "file_path": record.path,
        "size": record.size,
        "upload_time": record.upload_time,
        "status": record.status,
        "progress": record.progress,
        "message": record.message.clone().unwrap_or_default(),
        "error": record.error,
    })
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let engine = match state.backend.health().await {
        Ok(()) => "up",
        Err(_) => "down",
    };
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "engine": engine,
            "knowledge_bases": state.store.kb_count(),
            "files": state.store.file_count(),
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateKbRequest {
    name: String,
    #[serde(default)]
    description: String,
}

async fn create_knowledge_base(
    State(state): State<AppState>,
    Json(req): Json<CreateKbRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let kb = state.store.create_kb(req.name.trim(), &req.description)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "knowledge_base": {
                "name": kb.name,
                "description": kb.description,
                "created_at": kb.created_at,
            },
        })),
    ))
}

async fn list_knowledge_bases(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let kbs: Vec<Value> = state
        .store
        .list_kbs()
        .into_iter()
        .map(|(kb, files)| {
            json!({
                "name": kb.name,
                "description": kb.description,
                "created_at": kb.created_at,
                "files": files,
            })
        })
        .collect();
    (StatusCode::OK, Json(json!({ "knowledge_bases": kbs })))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    #[serde(default = "default_kb")]
    knowledge_base: String,
}

async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<FilesQuery>,
) -> (StatusCode, Json<Value>) {
    let files: Vec<Value> = state
        .store
        .list(&params.knowledge_base)
        .iter()
        .map(file_json)
        .collect();
    (StatusCode::OK, Json(json!({ "files": files })))
}

/// Multipart upload: a `knowledge_base` text field plus any number of file
/// parts. Each file succeeds or fails on its own; the report carries both.
async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut knowledge_base = default_kb();
    let mut incoming: Vec<(String, Result<Vec<u8>, String>)> = Vec::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        if name == "knowledge_base" {
            if let Ok(text) = field.text().await {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    knowledge_base = text;
                }
            }
        } else if name == "files" || name == "file" {
            let filename = field.file_name().unwrap_or("").to_string();
            match field.bytes().await {
                Ok(bytes) => incoming.push((filename, Ok(bytes.to_vec()))),
                Err(e) => incoming.push((filename, Err(format!("failed to read upload: {}", e)))),
            }
        }
    }

    if incoming.is_empty() {
        return Err(ApiError::InvalidArgument(
            "no file parts in upload".to_string(),
        ));
    }
    if !state.store.kb_exists(&knowledge_base) {
        return Err(ApiError::NotFound(format!(
            "Knowledge base '{}' not found",
            knowledge_base
        )));
    }

    let mut uploaded = 0usize;
    let mut failed = 0usize;
    let mut entries = Vec::new();
    for (filename, payload) in incoming {
        match payload {
            Ok(bytes) => match state.store.upload(&knowledge_base, &filename, &bytes).await {
                Ok(record) => {
                    uploaded += 1;
                    entries.push(json!({
                        "filename": record.original_name,
                        "safe_filename": record.safe_key,
                        "size": record.size,
                        "status": record.status,
                        "progress": record.progress,
                        "knowledge_base": record.knowledge_base,
                        "upload_time": record.upload_time,
                    }));
                }
                Err(e) => {
                    failed += 1;
                    entries.push(json!({ "filename": filename, "error": e.to_string() }));
                }
            },
            Err(e) => {
                failed += 1;
                entries.push(json!({ "filename": filename, "error": e }));
            }
        }
    }

    let status = if failed == 0 {
        "success"
    } else if uploaded == 0 {
        "failed"
    } else {
        "partial"
    };
    info!(
        "Upload to '{}': {} stored, {} failed",
        knowledge_base, uploaded, failed
    );
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": status,
            "uploaded_files": uploaded,
            "files": entries,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ParseForm {
    filename: String,
    #[serde(default = "default_kb")]
    knowledge_base: String,
}

async fn start_parse(
    State(state): State<AppState>,
    Form(form): Form<ParseForm>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let key = state
        .store
        .resolve_in_kb(&form.filename, &form.knowledge_base)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "File '{}' not found in knowledge base '{}'",
                form.filename, form.knowledge_base
            ))
        })?;
    match state.runner.start(&key).await? {
        StartOutcome::Started(record) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": format!("Started parsing {}", record.original_name),
                "file_key": record.safe_key,
            })),
        )),
        StartOutcome::NoOp(record) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "no_change",
                "message": format!("File is already {}", record.status.as_str()),
                "file_key": record.safe_key,
            })),
        )),
    }
}

async fn file_status(
    State(state): State<AppState>,
    Path(file_key): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let key = state
        .store
        .resolve(&file_key)
        .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", file_key)))?;
    let record = state
        .store
        .get(&key)
        .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", file_key)))?;
    Ok((StatusCode::OK, Json(file_json(&record))))
}

async fn reset_file(
    State(state): State<AppState>,
    Path(file_key): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record = state.store.reset(&file_key)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": format!("File {} status reset", record.original_name),
        })),
    ))
}

async fn reset_all_files(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let reset = state.store.reset_all();
    (
        StatusCode::OK,
        Json(json!({ "status": "success", "reset": reset })),
    )
}

async fn delete_file(
    State(state): State<AppState>,
    Path(file_key): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record = state.store.delete(&file_key).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": format!("File {} deleted", record.original_name),
            "deleted_file": record.original_name,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    query: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_kb")]
    knowledge_base: String,
}

async fn run_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(ApiError::InvalidArgument(
            "query must not be empty".to_string(),
        ));
    }
    let mode = QueryMode::parse(&req.mode).ok_or_else(|| {
        ApiError::InvalidArgument(format!(
            "invalid mode '{}' (expected one of: {})",
            req.mode,
            QueryMode::NAMES.join(", ")
        ))
    })?;
    let result = state
        .backend
        .query(query, mode, &req.knowledge_base)
        .await
        .map_err(ApiError::UpstreamUnavailable)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "result": result,
            "mode": mode,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    ))
}
