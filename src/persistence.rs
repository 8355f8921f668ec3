//! Registry persistence: bincode snapshots with atomic replace, a
//! background snapshot loop, and a shutdown hook that saves one last time.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::store::FileStore;
use crate::structures::{FileRecord, KnowledgeBase};

const PERSISTENCE_VERSION: u32 = 1;
const SNAPSHOT_FILE: &str = "registry.snapshot";
const SNAPSHOT_TEMP_FILE: &str = "registry.snapshot.tmp";

/// On-disk image of the registry. Vector order is insertion order.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub files: Vec<FileRecord>,
    pub knowledge_bases: Vec<KnowledgeBase>,
    pub version: u32,
    pub saved_at: u64,
}

impl PersistedState {
    fn empty() -> Self {
        Self {
            files: Vec::new(),
            knowledge_bases: Vec::new(),
            version: PERSISTENCE_VERSION,
            saved_at: 0,
        }
    }
}

#[derive(Clone)]
pub struct PersistenceManager {
    data_dir: PathBuf,
    snapshot_interval: Duration,
}

impl PersistenceManager {
    pub fn new(data_dir: &Path, snapshot_interval_secs: u64) -> Result<Self, String> {
        fs::create_dir_all(data_dir)
            .map_err(|e| format!("failed to create {}: {}", data_dir.display(), e))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            snapshot_interval: Duration::from_secs(snapshot_interval_secs),
        })
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    fn temp_snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_TEMP_FILE)
    }

    /// Read the snapshot, or an empty state when there is none yet. A
    /// snapshot written by a different version is ignored with a warning
    /// rather than half-parsed.
    pub fn load_state(&self) -> Result<PersistedState, String> {
        let path = self.snapshot_path();
        if !path.exists() {
            info!("No registry snapshot at {:?}, starting empty", path);
            return Ok(PersistedState::empty());
        }
        let data =
            fs::read(&path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let state: PersistedState = bincode::deserialize(&data)
            .map_err(|e| format!("failed to decode snapshot: {}", e))?;
        if state.version != PERSISTENCE_VERSION {
            warn!(
                "Snapshot version {} does not match expected {}; starting empty",
                state.version, PERSISTENCE_VERSION
            );
            return Ok(PersistedState::empty());
        }
        info!(
            "Loaded {} file records and {} knowledge bases from snapshot",
            state.files.len(),
            state.knowledge_bases.len()
        );
        Ok(state)
    }

    pub fn save_state(&self, store: &FileStore) -> Result<(), String> {
        let start = std::time::Instant::now();

        let state = PersistedState {
            files: store.export_records(),
            knowledge_bases: store.export_kbs(),
            version: PERSISTENCE_VERSION,
            saved_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        let data =
            bincode::serialize(&state).map_err(|e| format!("failed to encode snapshot: {}", e))?;

        // Write to a temp file first, then rename over the old snapshot
        let temp_path = self.temp_snapshot_path();
        fs::write(&temp_path, &data)
            .map_err(|e| format!("failed to write {}: {}", temp_path.display(), e))?;
        fs::rename(&temp_path, self.snapshot_path())
            .map_err(|e| format!("failed to replace snapshot: {}", e))?;

        info!(
            "Saved {} file records and {} knowledge bases in {:?} ({} bytes)",
            state.files.len(),
            state.knowledge_bases.len(),
            start.elapsed(),
            data.len()
        );
        Ok(())
    }

    pub async fn start_background_snapshots(&self, store: FileStore) -> tokio::task::JoinHandle<()> {
        let persistence = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(persistence.snapshot_interval);
            // the first tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = persistence.save_state(&store) {
                    error!("Background snapshot failed: {}", e);
                }
            }
        })
    }
}

/// Save a final snapshot on SIGINT or SIGTERM, then exit.
pub async fn setup_shutdown_handler(persistence: PersistenceManager, store: FileStore) {
    tokio::spawn(async move {
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to create SIGINT handler");
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to create SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }

        info!("Saving final snapshot before shutdown...");
        if let Err(e) = persistence.save_state(&store) {
            error!("Failed to save final snapshot: {}", e);
        }

        std::process::exit(0);
    });
}
