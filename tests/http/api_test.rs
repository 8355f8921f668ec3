use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use ragbridge::structures::QueryMode;

use crate::{
    delete_req, get, post_empty, post_form, post_json, send, test_app, upload_request,
};

#[tokio::test]
async fn health_reports_engine_state() {
    let app = test_app();

    let (status, body) = send(&app.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["engine"], "up");
    assert_eq!(body["knowledge_bases"], 1);
    assert_eq!(body["files"], 0);

    app.engine.healthy.store(false, Ordering::SeqCst);
    let (status, body) = send(&app.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK, "health stays 200 when the engine is down");
    assert_eq!(body["engine"], "down");
}

#[tokio::test]
async fn knowledge_bases_create_list_and_conflict() {
    let app = test_app();

    let (status, body) = send(
        &app.app,
        post_json(
            "/api/knowledge-bases",
            json!({"name": "papers", "description": "research"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["knowledge_base"]["name"], "papers");

    let (status, body) = send(
        &app.app,
        post_json("/api/knowledge-bases", json!({"name": "papers"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("already exists"));

    let (status, body) = send(
        &app.app,
        post_json("/api/knowledge-bases", json!({"name": "has space"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("name"));

    let (status, body) = send(&app.app, get("/api/knowledge-bases")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["knowledge_bases"]
        .as_array()
        .unwrap()
        .iter()
        .map(|kb| kb["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["default", "papers"]);
}

#[tokio::test]
async fn upload_stores_files_and_lists_them() {
    let app = test_app();

    let (status, body) = send(
        &app.app,
        upload_request(None, &[("report.txt", b"hello world")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["uploaded_files"], 1);
    let safe = body["files"][0]["safe_filename"].as_str().unwrap();
    assert!(safe.starts_with("default_") && safe.ends_with(".txt"));

    // the knowledge_base field may arrive after the file parts
    let (status, body) = send(&app.app, get("/api/files")).await;
    assert_eq!(status, StatusCode::OK);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["filename"], "report.txt");
    assert_eq!(files[0]["status"], "uploaded");
    assert_eq!(files[0]["progress"], 0);
    assert_eq!(files[0]["message"], "");
}

#[tokio::test]
async fn upload_reports_per_file_failures() {
    let app = test_app();

    let (status, body) = send(
        &app.app,
        upload_request(Some("default"), &[("good.txt", b"data"), ("", b"junk")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["uploaded_files"], 1);

    let entries = body["files"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0]["error"].is_null());
    assert!(entries[1]["error"].as_str().is_some());
}

#[tokio::test]
async fn upload_to_unknown_kb_is_rejected() {
    let app = test_app();

    let (status, body) = send(
        &app.app,
        upload_request(Some("ghost"), &[("a.txt", b"x")]),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("Knowledge base 'ghost' not found"));
    assert_eq!(app.store.file_count(), 0);
}

#[tokio::test]
async fn upload_without_file_parts_is_rejected() {
    let app = test_app();

    let (status, body) = send(&app.app, upload_request(Some("default"), &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("no file parts"));
}

#[tokio::test(start_paused = true)]
async fn parse_runs_a_file_to_completion() {
    let app = test_app();
    send(
        &app.app,
        upload_request(None, &[("report.txt", b"quarterly numbers")]),
    )
    .await;

    let (status, body) = send(
        &app.app,
        post_form("/api/parse", "filename=report.txt&knowledge_base=default"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Started parsing report.txt");
    let file_key = body["file_key"].as_str().unwrap().to_string();

    let mut finished = None;
    for _ in 0..200 {
        let (status, body) = send(
            &app.app,
            get(&format!("/api/files/{}/status", file_key)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" {
            finished = Some(body);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let body = finished.expect("ingestion never completed");
    assert_eq!(body["progress"], 100);
    assert!(body["error"].is_null());
}

#[tokio::test(start_paused = true)]
async fn duplicate_parse_reports_no_change() {
    let app = test_app();
    *app.engine.insert_delay.lock().unwrap() = Duration::from_secs(60);
    send(&app.app, upload_request(None, &[("report.txt", b"x")])).await;

    let (status, body) = send(&app.app, post_form("/api/parse", "filename=report.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = send(&app.app, post_form("/api/parse", "filename=report.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_change");
    assert_eq!(body["message"], "File is already processing");
}

#[tokio::test]
async fn parse_of_unknown_file_is_not_found() {
    let app = test_app();

    let (status, body) = send(&app.app, post_form("/api/parse", "filename=ghost.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["detail"],
        "File 'ghost.txt' not found in knowledge base 'default'"
    );
}

#[tokio::test]
async fn parse_with_engine_down_is_unavailable() {
    let app = test_app();
    send(&app.app, upload_request(None, &[("report.txt", b"x")])).await;
    app.engine.healthy.store(false, Ordering::SeqCst);

    let (status, body) = send(&app.app, post_form("/api/parse", "filename=report.txt")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("retrieval engine is not available"));

    // the record was never claimed
    let (_, body) = send(&app.app, get("/api/files/report.txt/status")).await;
    assert_eq!(body["status"], "uploaded");
}

#[tokio::test]
async fn status_resolves_safe_key_and_original_name() {
    let app = test_app();
    let (_, body) = send(&app.app, upload_request(None, &[("report.txt", b"x")])).await;
    let safe = body["files"][0]["safe_filename"].as_str().unwrap().to_string();

    let (status, by_key) = send(&app.app, get(&format!("/api/files/{}/status", safe))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_key["filename"], "report.txt");

    let (status, by_name) = send(&app.app, get("/api/files/report.txt/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_name["safe_filename"], safe.as_str());

    let (status, body) = send(&app.app, get("/api/files/ghost.txt/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("ghost.txt"));
}

#[tokio::test]
async fn reset_and_delete_round_trip() {
    let app = test_app();
    let (_, body) = send(&app.app, upload_request(None, &[("report.txt", b"x")])).await;
    let safe = body["files"][0]["safe_filename"].as_str().unwrap().to_string();

    let (status, body) = send(&app.app, post_empty("/api/files/report.txt/reset")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "File report.txt status reset");

    let (status, body) = send(&app.app, delete_req(&format!("/api/files/{}", safe))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_file"], "report.txt");

    let (status, _) = send(&app.app, delete_req(&format!("/api/files/{}", safe))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app.app, get("/api/files")).await;
    assert!(body["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn reset_all_counts_the_records() {
    let app = test_app();
    send(
        &app.app,
        upload_request(None, &[("a.txt", b"1"), ("b.txt", b"2")]),
    )
    .await;

    let (status, body) = send(&app.app, post_empty("/api/files/reset-all")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["reset"], 2);
}

#[tokio::test]
async fn query_proxies_the_engine_answer() {
    let app = test_app();

    let (status, body) = send(
        &app.app,
        post_json(
            "/api/query",
            json!({"query": "what is in the report", "mode": "local"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["mode"], "local");
    assert_eq!(body["result"], *app.engine.answer.lock().unwrap());
    assert!(body["timestamp"].as_str().unwrap().contains('T'));

    let seen = app.engine.last_query.lock().unwrap().clone();
    assert_eq!(
        seen,
        Some((
            "what is in the report".to_string(),
            QueryMode::Local,
            "default".to_string()
        ))
    );
}

#[tokio::test]
async fn query_defaults_to_hybrid_mode() {
    let app = test_app();

    let (status, body) = send(&app.app, post_json("/api/query", json!({"query": "x"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "hybrid");
}

#[tokio::test]
async fn query_rejects_unknown_modes() {
    let app = test_app();

    let (status, body) = send(
        &app.app,
        post_json("/api/query", json!({"query": "x", "mode": "turbo"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("invalid mode 'turbo'"), "got {}", detail);
    assert!(detail.contains("naive, local, global, hybrid"));
}

#[tokio::test]
async fn query_rejects_blank_text() {
    let app = test_app();

    let (status, body) = send(
        &app.app,
        post_json("/api/query", json!({"query": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "query must not be empty");
}

#[tokio::test]
async fn query_with_engine_down_is_unavailable() {
    let app = test_app();
    app.engine.healthy.store(false, Ordering::SeqCst);

    let (status, body) = send(
        &app.app,
        post_json("/api/query", json!({"query": "anything"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "connection refused");
}
