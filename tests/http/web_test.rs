use axum::http::{header, StatusCode};
use axum::Router;
use tower::util::ServiceExt; // for `oneshot`

use ragbridge::web;

use crate::get;

async fn fetch(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app.clone().oneshot(get(uri)).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn placeholder_page_when_no_assets_exist() {
    let dir = tempfile::tempdir().unwrap();
    let app = web::routes(dir.path().to_path_buf());

    let (status, content_type, body) = fetch(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/html"));
    assert!(body.contains("ragbridge"));
}

#[tokio::test]
async fn serves_assets_with_guessed_content_type() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.css"), "body { margin: 0; }").unwrap();
    let app = web::routes(dir.path().to_path_buf());

    let (status, content_type, body) = fetch(&app, "/static/app.css").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().contains("text/css"));
    assert_eq!(body, "body { margin: 0; }");
}

#[tokio::test]
async fn unknown_paths_fall_back_to_index() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>console</html>").unwrap();
    let app = web::routes(dir.path().to_path_buf());

    let (status, _, body) = fetch(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<html>console</html>");

    let (status, content_type, body) = fetch(&app, "/static/missing.js").await;
    assert_eq!(status, StatusCode::OK, "missing assets fall back to the SPA shell");
    assert_eq!(content_type.as_deref(), Some("text/html"));
    assert_eq!(body, "<html>console</html>");
}

#[tokio::test]
async fn parent_directory_traversal_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>console</html>").unwrap();
    let app = web::routes(dir.path().to_path_buf());

    let (status, _, _) = fetch(&app, "/static/../secret.txt").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
