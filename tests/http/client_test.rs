//! `ApiClient` driven against a served router, the way the console uses it.

use std::sync::Arc;
use std::time::Duration;

use ragbridge::poller::{self, PollEvent, StatusSource};
use ragbridge::structures::QueryMode;

use super::serve_app;

#[tokio::test]
async fn narrated_query_returns_the_engine_answer_unmodified() {
    let (client, app) = serve_app().await;

    let body = client
        .query_narrated("what do the quarterly results show?", QueryMode::Global, "default")
        .await
        .unwrap();

    assert_eq!(body["status"], "success");
    assert_eq!(body["mode"], "global");
    assert_eq!(
        body["result"],
        *app.engine.answer.lock().unwrap(),
        "the narration must not touch the answer"
    );

    let seen = app.engine.last_query.lock().unwrap().clone();
    let (query, mode, kb) = seen.expect("engine saw the query");
    assert_eq!(query, "what do the quarterly results show?");
    assert_eq!(mode, QueryMode::Global);
    assert_eq!(kb, "default");
}

#[tokio::test]
async fn narrated_query_surfaces_upstream_errors() {
    let (client, app) = serve_app().await;
    app.engine
        .healthy
        .store(false, std::sync::atomic::Ordering::SeqCst);

    let err = client
        .query_narrated("anything", QueryMode::Hybrid, "default")
        .await
        .unwrap_err();
    assert!(err.contains("503"), "got {}", err);
    assert!(err.contains("connection refused"), "got {}", err);
}

#[tokio::test]
async fn watch_to_completion_then_list_shows_the_finished_file() {
    let (client, _app) = serve_app().await;

    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("quarterly.txt");
    tokio::fs::write(&doc, b"quarterly revenue grew in every region")
        .await
        .unwrap();

    let report = client.upload("default", &[doc]).await.unwrap();
    let key = report["files"][0]["safe_filename"]
        .as_str()
        .expect("upload reports the stored key")
        .to_string();

    client.start_parse(&key, "default").await.unwrap();

    let source: Arc<dyn StatusSource> = Arc::new(client.clone());
    let mut handle = poller::watch(source, key.clone());
    let outcome = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match handle.next_event().await {
                Some(PollEvent::Progress { .. }) => continue,
                other => break other,
            }
        }
    })
    .await
    .expect("ingestion finished within the deadline");
    assert!(matches!(outcome, Some(PollEvent::Completed)), "got {:?}", outcome);

    // the console refreshes its listing on completion; the refreshed view
    // must already show the terminal state
    let details = client.file_details(&key).await.unwrap();
    let kb = details["knowledge_base"]
        .as_str()
        .expect("details carry the knowledge base")
        .to_string();
    assert_eq!(kb, "default");

    let files = client.list_files(&kb).await.unwrap();
    let entry = files
        .iter()
        .find(|f| f["safe_filename"].as_str() == Some(key.as_str()))
        .expect("refreshed listing includes the ingested file");
    assert_eq!(entry["status"], "completed");
    assert_eq!(entry["progress"], 100);
}
