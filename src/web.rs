//! Static assets for the operator console.
//!
//! Serves a built front-end from a directory on disk; when none is present
//! a minimal placeholder page keeps `/` useful.

use std::path::PathBuf;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::debug;

#[derive(Clone)]
struct WebState {
    static_dir: PathBuf,
}

pub fn routes(static_dir: PathBuf) -> Router {
    let state = WebState { static_dir };
    Router::new()
        .route("/", get(serve))
        .route("/static/*path", get(serve))
        .with_state(state)
}

async fn serve(State(state): State<WebState>, uri: Uri) -> Response {
    let mut path = uri.path().trim_start_matches('/').to_string();
    if let Some(rest) = path.strip_prefix("static/") {
        path = rest.to_string();
    }
    if path.is_empty() {
        path = "index.html".to_string();
    }
    if path.split('/').any(|seg| seg == "..") {
        return (StatusCode::BAD_REQUEST, "bad path").into_response();
    }

    let full = state.static_dir.join(&path);
    if full.is_file() {
        let mime = mime_guess::from_path(&full).first_or_octet_stream();
        match tokio::fs::read(&full).await {
            Ok(content) => {
                return Response::builder()
                    .header(header::CONTENT_TYPE, mime.as_ref())
                    .body(Body::from(content))
                    .unwrap();
            }
            Err(e) => debug!("failed to read asset {:?}: {}", full, e),
        }
    }

    // SPA fallback: unknown paths get index.html when one exists
    let index = state.static_dir.join("index.html");
    if index.is_file() {
        if let Ok(content) = tokio::fs::read(&index).await {
            return Response::builder()
                .header(header::CONTENT_TYPE, "text/html")
                .body(Body::from(content))
                .unwrap();
        }
    }

    placeholder()
}

fn placeholder() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html")
        .body(Body::from(
            "<!doctype html><html><head><title>ragbridge</title></head>\
             <body><h1>ragbridge</h1><p>The console front-end is not built. \
             The API is live under <code>/api</code>; try <code>ragctl</code> \
             from a terminal.</p></body></html>",
        ))
        .unwrap()
}
