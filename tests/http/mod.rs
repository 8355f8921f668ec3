//! HTTP surface tests. The route suites drive the router in-process through
//! tower's `oneshot`; the client suite serves it on an ephemeral socket.

mod api_test;
mod client_test;
mod web_test;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use ragbridge::api::{self, AppState};
use ragbridge::client::ApiClient;
use ragbridge::store::FileStore;
use ragbridge::structures::QueryMode;
use ragbridge::upstream::{EngineProgress, RetrievalBackend};

pub const BOUNDARY: &str = "ragbridgeboundary";

/// Engine stand-in behind the routes: togglable health, adjustable insert
/// duration, canned answer, and a record of the last query it saw.
pub struct StubEngine {
    pub healthy: AtomicBool,
    pub insert_delay: Mutex<Duration>,
    pub answer: Mutex<Value>,
    pub last_query: Mutex<Option<(String, QueryMode, String)>>,
}

impl StubEngine {
    pub fn up() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            insert_delay: Mutex::new(Duration::ZERO),
            answer: Mutex::new(json!(
                "The stored document describes quarterly results in enough detail to answer."
            )),
            last_query: Mutex::new(None),
        })
    }
}

#[async_trait]
impl RetrievalBackend for StubEngine {
    async fn health(&self) -> Result<(), String> {
        if self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err("connection refused".to_string())
        }
    }

    async fn insert_document(&self, _file_path: &str, _kb: &str) -> Result<(), String> {
        let delay = *self.insert_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn progress(&self, _file_key: &str) -> Result<Option<EngineProgress>, String> {
        Ok(None)
    }

    async fn query(&self, query: &str, mode: QueryMode, kb: &str) -> Result<Value, String> {
        if !self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
            return Err("connection refused".to_string());
        }
        *self.last_query.lock().unwrap() =
            Some((query.to_string(), mode, kb.to_string()));
        Ok(self.answer.lock().unwrap().clone())
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: FileStore,
    pub engine: Arc<StubEngine>,
    _dir: TempDir,
}

pub fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path()).unwrap();
    store.ensure_default_kb();
    let engine = StubEngine::up();
    let backend: Arc<dyn RetrievalBackend> = engine.clone();
    let state = AppState::new(store.clone(), backend);
    TestApp {
        app: api::routes(state),
        store,
        engine,
        _dir: dir,
    }
}

/// Serve a fresh app on a random local port and point an `ApiClient` at it.
/// The listener task lives until the test runtime shuts down.
pub async fn serve_app() -> (ApiClient, TestApp) {
    let app = test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let client = ApiClient::new(&format!("http://{}", addr)).unwrap();
    (client, app)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn delete_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Hand-rolled multipart body: an optional `knowledge_base` text field and
/// one `files` part per entry.
pub fn upload_request(kb: Option<&str>, files: &[(&str, &[u8])]) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    if let Some(kb) = kb {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"knowledge_base\"\r\n\r\n{}\r\n",
                BOUNDARY, kb
            )
            .as_bytes(),
        );
    }
    for (filename, content) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}
