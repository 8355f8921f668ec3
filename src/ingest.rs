//! Ingestion driver: claims records and walks them through
//! `processing -> completed | error` against the retrieval engine.
//!
//! At most one live task per record. The claim is a compare-and-set under
//! the record lock, and every write a task makes afterwards carries the
//! epoch it was handed at claim time, so a task orphaned by reset or delete
//! dies silently instead of corrupting its successor.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use crate::config::{
    ENGINE_PROGRESS_POLL_SECS, MERGE_PROGRESS_CEIL, MERGE_PROGRESS_FLOOR, STAGE_PACING_MS,
};
use crate::error::ApiError;
use crate::store::{BeginState, FileStore};
use crate::structures::{FileRecord, QueryMode};
use crate::upstream::RetrievalBackend;

/// What a start request did.
#[derive(Debug)]
pub enum StartOutcome {
    Started(FileRecord),
    /// The record was not `uploaded`; nothing was spawned.
    NoOp(FileRecord),
}

#[derive(Clone)]
pub struct IngestRunner {
    store: FileStore,
    backend: Arc<dyn RetrievalBackend>,
}

impl IngestRunner {
    pub fn new(store: FileStore, backend: Arc<dyn RetrievalBackend>) -> Self {
        Self { store, backend }
    }

    /// Begin ingesting `key` (safe key or original name). Duplicate starts
    /// are no-ops reporting the current state.
    pub async fn start(&self, key: &str) -> Result<StartOutcome, ApiError> {
        let safe = self
            .store
            .resolve(key)
            .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", key)))?;

        // do not claim the record if the engine cannot take the hand-off
        self.backend.health().await.map_err(|e| {
            ApiError::UpstreamUnavailable(format!("retrieval engine is not available: {}", e))
        })?;

        match self.store.try_begin_processing(&safe) {
            BeginState::Started { record, epoch } => {
                let store = self.store.clone();
                let backend = Arc::clone(&self.backend);
                let snapshot = record.clone();
                tokio::spawn(async move {
                    run_ingestion(store, backend, snapshot, epoch).await;
                });
                Ok(StartOutcome::Started(record))
            }
            BeginState::Busy { record } => Ok(StartOutcome::NoOp(record)),
            BeginState::Missing => Err(ApiError::NotFound(format!("File not found: {}", key))),
        }
    }
}

async fn run_ingestion(
    store: FileStore,
    backend: Arc<dyn RetrievalBackend>,
    record: FileRecord,
    epoch: u64,
) {
    let key = record.safe_key.clone();
    info!(
        "Ingestion started for {} (kb '{}')",
        key, record.knowledge_base
    );
    let pacing = Duration::from_millis(STAGE_PACING_MS);

    store.set_progress(&key, epoch, 5, Some("Initializing parse task"));
    sleep(pacing).await;

    store.set_progress(&key, epoch, 10, Some("Verifying file exists"));
    if !Path::new(&record.path).exists() {
        store.fail(
            &key,
            epoch,
            &format!("File missing from disk: {}", record.path),
        );
        return;
    }
    sleep(pacing).await;

    store.set_progress(&key, epoch, 20, Some("File validated, preparing hand-off"));
    sleep(pacing).await;

    store.set_progress(&key, epoch, 30, Some("Connecting to retrieval engine"));

    match insert_with_progress_merge(&store, backend.as_ref(), &record, epoch).await {
        Ok(()) => {
            store.set_progress(&key, epoch, 90, Some("Engine finished, verifying ingestion"));
            let note = if verify_ingestion(backend.as_ref(), &record).await {
                None
            } else {
                Some("Ingestion completed, but the verification query found nothing")
            };
            if store.complete(&key, epoch, note) {
                info!("Ingestion completed for {}", key);
            } else {
                debug!(
                    "ingestion result for {} dropped (record was reset or removed)",
                    key
                );
            }
        }
        Err(e) => {
            warn!("Ingestion failed for {}: {}", key, e);
            if !store.fail(&key, epoch, &e) {
                debug!(
                    "ingestion failure for {} dropped (record was reset or removed)",
                    key
                );
            }
        }
    }
}

/// Run the engine insert while folding any engine-reported progress into
/// the record. Engine numbers land in the `31..=89` band so the staged
/// narration below and the verification step above keep their own slots.
async fn insert_with_progress_merge(
    store: &FileStore,
    backend: &dyn RetrievalBackend,
    record: &FileRecord,
    epoch: u64,
) -> Result<(), String> {
    let insert = backend.insert_document(&record.path, &record.knowledge_base);
    tokio::pin!(insert);

    // keys the engine might be tracking this document under
    let mut candidates: Vec<String> =
        vec![record.safe_key.clone(), record.original_name.clone()];
    if let Some(stem) = record.original_name.split('.').next() {
        candidates.push(stem.to_string());
    }
    candidates.dedup();

    let mut ticker = interval(Duration::from_secs(ENGINE_PROGRESS_POLL_SECS));
    loop {
        tokio::select! {
            res = &mut insert => return res,
            _ = ticker.tick() => {
                for key in &candidates {
                    match backend.progress(key).await {
                        Ok(Some(p)) => {
                            let merged = p.progress.clamp(MERGE_PROGRESS_FLOOR, MERGE_PROGRESS_CEIL);
                            store.set_progress(&record.safe_key, epoch, merged, p.message.as_deref());
                            break;
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            debug!("progress probe for {} failed: {}", key, e);
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Best-effort check that the engine can answer something about the
/// document. Failure downgrades to a note on the record, never an error.
async fn verify_ingestion(backend: &dyn RetrievalBackend, record: &FileRecord) -> bool {
    // give the engine a moment to finish committing its index
    sleep(Duration::from_secs(3)).await;
    let stem = record.original_name.split('.').next().unwrap_or("");
    let probe: String = if stem.len() > 3 {
        stem.chars().take(20).collect()
    } else {
        "test query".to_string()
    };
    match backend
        .query(&probe, QueryMode::Naive, &record.knowledge_base)
        .await
    {
        Ok(answer) => {
            let text = answer.to_string();
            text.to_lowercase().contains(&probe.to_lowercase()) || text.trim().len() > 50
        }
        Err(e) => {
            debug!("verification query failed for {}: {}", record.safe_key, e);
            false
        }
    }
}
