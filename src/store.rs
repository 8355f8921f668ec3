//! File registry: safe-key identity, uploaded bytes, knowledge bases, and
//! the status fields the ingestion driver writes through.
//!
//! All lookups go through [`FileStore::resolve`]: exact safe-key match first,
//! then a fallback over original file names (most recent upload wins, with a
//! warning when the name is ambiguous). Status writes carry the epoch handed
//! out when a record entered `processing`, so a task orphaned by a reset or
//! delete cannot scribble over its successor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_KNOWLEDGE_BASE, SAFE_KEY_RETRY_LIMIT, SAFE_KEY_TOKEN_LEN};
use crate::error::ApiError;
use crate::structures::{FileRecord, FileStatus, KnowledgeBase};

/// Outcome of asking for an ingestion slot on a record.
pub enum BeginState {
    /// Record flipped to `processing`; `epoch` is the task's write ticket.
    Started { record: FileRecord, epoch: u64 },
    /// Record is not `uploaded`; snapshot of what it is instead.
    Busy { record: FileRecord },
    Missing,
}

/// What a filesystem sync found at startup.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub registered_kbs: usize,
    pub recovered_files: usize,
    pub dropped_records: usize,
}

/// Shared registry of uploads and knowledge bases. Cheap to clone; all
/// clones see the same state.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    records: DashMap<String, FileRecord>,
    record_order: RwLock<IndexSet<String>>,
    kbs: DashMap<String, KnowledgeBase>,
    kb_order: RwLock<IndexSet<String>>,
    data_dir: PathBuf,
}

/// Build the on-disk name for an upload: `{kb}_{token}{ext}`.
pub fn make_safe_key(kb: &str, original_name: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let ext = Path::new(original_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}_{}{}", kb, &token[..SAFE_KEY_TOKEN_LEN], ext)
}

fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl FileStore {
    pub fn new(data_dir: &Path) -> Result<Self, String> {
        let uploads = data_dir.join("uploads");
        let kbs = data_dir.join("knowledge_bases");
        std::fs::create_dir_all(&uploads)
            .map_err(|e| format!("failed to create {}: {}", uploads.display(), e))?;
        std::fs::create_dir_all(&kbs)
            .map_err(|e| format!("failed to create {}: {}", kbs.display(), e))?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                records: DashMap::new(),
                record_order: RwLock::new(IndexSet::new()),
                kbs: DashMap::new(),
                kb_order: RwLock::new(IndexSet::new()),
                data_dir: data_dir.to_path_buf(),
            }),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.inner.data_dir.join("uploads")
    }

    pub fn kb_dir(&self, name: &str) -> PathBuf {
        self.inner.data_dir.join("knowledge_bases").join(name)
    }

    // ------------------------------------------------------------------
    // Knowledge bases
    // ------------------------------------------------------------------

    pub fn validate_kb_name(name: &str) -> Result<(), ApiError> {
        if name.is_empty() || name.len() > 64 {
            return Err(ApiError::InvalidArgument(
                "knowledge base name must be 1-64 characters".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ApiError::InvalidArgument(
                "knowledge base name may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
        Ok(())
    }

    pub fn create_kb(&self, name: &str, description: &str) -> Result<KnowledgeBase, ApiError> {
        Self::validate_kb_name(name)?;
        let dir = self.kb_dir(name);
        std::fs::create_dir_all(&dir).map_err(|e| {
            ApiError::Internal(format!("failed to create knowledge base directory: {}", e))
        })?;
        let kb = KnowledgeBase {
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        match self.inner.kbs.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(kb.clone());
            }
            Entry::Occupied(_) => {
                return Err(ApiError::Conflict(format!(
                    "Knowledge base '{}' already exists",
                    name
                )))
            }
        }
        write_lock(&self.inner.kb_order).insert(name.to_string());
        info!("Created knowledge base '{}'", name);
        Ok(kb)
    }

    /// Idempotent guarantee that the default knowledge base exists.
    pub fn ensure_default_kb(&self) {
        match self.create_kb(DEFAULT_KNOWLEDGE_BASE, "Default knowledge base") {
            Ok(_) => {}
            Err(ApiError::Conflict(_)) => {}
            Err(e) => warn!("could not ensure default knowledge base: {}", e),
        }
    }

    pub fn kb_exists(&self, name: &str) -> bool {
        self.inner.kbs.contains_key(name)
    }

    pub fn kb_count(&self) -> usize {
        self.inner.kbs.len()
    }

    /// Knowledge bases in creation order, each with its current file count.
    pub fn list_kbs(&self) -> Vec<(KnowledgeBase, usize)> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for r in self.inner.records.iter() {
            *counts.entry(r.knowledge_base.clone()).or_insert(0) += 1;
        }
        read_lock(&self.inner.kb_order)
            .iter()
            .filter_map(|name| {
                self.inner.kbs.get(name).map(|kb| {
                    let n = counts.get(name).copied().unwrap_or(0);
                    (kb.clone(), n)
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    /// Store one uploaded file: bytes first, record second, so a failed
    /// write leaves nothing behind.
    pub async fn upload(
        &self,
        kb: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<FileRecord, ApiError> {
        if !self.kb_exists(kb) {
            return Err(ApiError::NotFound(format!(
                "Knowledge base '{}' not found",
                kb
            )));
        }
        let original = sanitize_filename(original_name);
        if original.is_empty() {
            return Err(ApiError::InvalidArgument(
                "upload is missing a file name".to_string(),
            ));
        }

        for _ in 0..SAFE_KEY_RETRY_LIMIT {
            let key = make_safe_key(kb, &original);
            if self.inner.records.contains_key(&key) {
                continue;
            }
            let path = self.uploads_dir().join(&key);
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| ApiError::Internal(format!("failed to store upload: {}", e)))?;

            let record = FileRecord {
                safe_key: key.clone(),
                original_name: original.clone(),
                knowledge_base: kb.to_string(),
                path: path.to_string_lossy().into_owned(),
                size: bytes.len() as u64,
                upload_time: Utc::now().to_rfc3339(),
                status: FileStatus::Uploaded,
                progress: 0,
                message: None,
                error: None,
                epoch: 0,
            };
            let inserted = match self.inner.records.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                    true
                }
                Entry::Occupied(_) => false,
            };
            if !inserted {
                // lost a race on this key; discard the bytes and draw again
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            write_lock(&self.inner.record_order).insert(key);
            info!(
                "Stored upload '{}' as {} ({} bytes, kb '{}')",
                record.original_name, record.safe_key, record.size, kb
            );
            return Ok(record);
        }
        Err(ApiError::Internal(
            "could not allocate a unique file key".to_string(),
        ))
    }

    pub fn get(&self, safe_key: &str) -> Option<FileRecord> {
        self.inner.records.get(safe_key).map(|r| r.clone())
    }

    pub fn file_count(&self) -> usize {
        self.inner.records.len()
    }

    /// Records belonging to `kb`, oldest upload first.
    pub fn list(&self, kb: &str) -> Vec<FileRecord> {
        read_lock(&self.inner.record_order)
            .iter()
            .filter_map(|key| self.inner.records.get(key).map(|r| r.clone()))
            .filter(|r| r.knowledge_base == kb)
            .collect()
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Exact safe-key match, then fallback over original names across all
    /// knowledge bases. The most recent upload wins an ambiguous name.
    pub fn resolve(&self, key: &str) -> Option<String> {
        if self.inner.records.contains_key(key) {
            return Some(key.to_string());
        }
        let order = read_lock(&self.inner.record_order);
        let mut matches = order.iter().rev().filter(|k| {
            self.inner
                .records
                .get(k.as_str())
                .map_or(false, |r| r.original_name == key)
        });
        let newest = matches.next()?.clone();
        let extra = matches.count();
        drop(order);
        if extra > 0 {
            warn!(
                "file key '{}' matched {} records by original name; resolving to most recent upload {}",
                key,
                extra + 1,
                newest
            );
        }
        Some(newest)
    }

    /// Like [`resolve`](Self::resolve), but scoped to one knowledge base.
    pub fn resolve_in_kb(&self, name: &str, kb: &str) -> Option<String> {
        if let Some(r) = self.inner.records.get(name) {
            if r.knowledge_base == kb {
                return Some(name.to_string());
            }
        }
        let order = read_lock(&self.inner.record_order);
        let mut matches = order.iter().rev().filter(|k| {
            self.inner
                .records
                .get(k.as_str())
                .map_or(false, |r| r.knowledge_base == kb && r.original_name == name)
        });
        let newest = matches.next()?.clone();
        let extra = matches.count();
        drop(order);
        if extra > 0 {
            warn!(
                "file '{}' appears {} times in knowledge base '{}'; resolving to most recent upload {}",
                name,
                extra + 1,
                kb,
                newest
            );
        }
        Some(newest)
    }

    // ------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------

    /// Claim a record for ingestion. Flips `uploaded` to `processing` under
    /// the record lock; exactly one of any number of racing callers gets
    /// `Started` back.
    pub fn try_begin_processing(&self, safe_key: &str) -> BeginState {
        match self.inner.records.get_mut(safe_key) {
            Some(mut r) => {
                if r.status == FileStatus::Uploaded {
                    r.status = FileStatus::Processing;
                    r.progress = 0;
                    r.message = Some("Queued for ingestion".to_string());
                    r.error = None;
                    r.epoch += 1;
                    BeginState::Started {
                        epoch: r.epoch,
                        record: r.clone(),
                    }
                } else {
                    BeginState::Busy { record: r.clone() }
                }
            }
            None => BeginState::Missing,
        }
    }

    /// Progress write from an ingestion task. Monotonic, capped at 99 (100
    /// belongs to the completed transition), dropped when the task's epoch
    /// is stale or the record left `processing`.
    pub fn set_progress(
        &self,
        safe_key: &str,
        epoch: u64,
        progress: u8,
        message: Option<&str>,
    ) -> bool {
        match self.inner.records.get_mut(safe_key) {
            Some(mut r) if r.epoch == epoch && r.status == FileStatus::Processing => {
                let capped = progress.min(99);
                if capped > r.progress {
                    r.progress = capped;
                }
                if let Some(m) = message {
                    r.message = Some(m.to_string());
                }
                true
            }
            _ => false,
        }
    }

    pub fn complete(&self, safe_key: &str, epoch: u64, note: Option<&str>) -> bool {
        match self.inner.records.get_mut(safe_key) {
            Some(mut r) if r.epoch == epoch && r.status == FileStatus::Processing => {
                r.status = FileStatus::Completed;
                r.progress = 100;
                r.message = note.map(|s| s.to_string());
                r.error = None;
                true
            }
            _ => false,
        }
    }

    /// Progress keeps its last value so an operator can see how far the
    /// task got before it died.
    pub fn fail(&self, safe_key: &str, epoch: u64, error: &str) -> bool {
        match self.inner.records.get_mut(safe_key) {
            Some(mut r) if r.epoch == epoch && r.status == FileStatus::Processing => {
                r.status = FileStatus::Error;
                r.error = Some(error.to_string());
                r.message = None;
                true
            }
            _ => false,
        }
    }

    /// Back to `uploaded` from any state. Bumps the epoch so a live task
    /// for the old incarnation loses its write ticket.
    pub fn reset(&self, key: &str) -> Result<FileRecord, ApiError> {
        let safe = self
            .resolve(key)
            .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", key)))?;
        match self.inner.records.get_mut(&safe) {
            Some(mut r) => {
                r.status = FileStatus::Uploaded;
                r.progress = 0;
                r.message = None;
                r.error = None;
                r.epoch += 1;
                Ok(r.clone())
            }
            None => Err(ApiError::NotFound(format!("File not found: {}", key))),
        }
    }

    /// Per-record resets over the whole registry. Not transactional: a
    /// record deleted mid-iteration is simply skipped.
    pub fn reset_all(&self) -> usize {
        let keys: Vec<String> = read_lock(&self.inner.record_order).iter().cloned().collect();
        let mut count = 0;
        for key in keys {
            if let Some(mut r) = self.inner.records.get_mut(&key) {
                r.status = FileStatus::Uploaded;
                r.progress = 0;
                r.message = None;
                r.error = None;
                r.epoch += 1;
                count += 1;
            }
        }
        count
    }

    /// Remove the record, then its bytes. Missing bytes are tolerated.
    pub async fn delete(&self, key: &str) -> Result<FileRecord, ApiError> {
        let safe = self
            .resolve(key)
            .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", key)))?;
        let (_, record) = self
            .inner
            .records
            .remove(&safe)
            .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", key)))?;
        write_lock(&self.inner.record_order).shift_remove(&safe);
        match tokio::fs::remove_file(&record.path).await {
            Ok(()) => info!("Deleted {} and its stored bytes", safe),
            Err(e) => warn!(
                "record {} removed but stored bytes could not be deleted: {}",
                safe, e
            ),
        }
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Snapshot + startup sync
    // ------------------------------------------------------------------

    /// Records in upload order, for snapshotting.
    pub fn export_records(&self) -> Vec<FileRecord> {
        read_lock(&self.inner.record_order)
            .iter()
            .filter_map(|key| self.inner.records.get(key).map(|r| r.clone()))
            .collect()
    }

    pub fn export_kbs(&self) -> Vec<KnowledgeBase> {
        read_lock(&self.inner.kb_order)
            .iter()
            .filter_map(|name| self.inner.kbs.get(name).map(|kb| kb.clone()))
            .collect()
    }

    /// Load a snapshot into an empty store; vector order becomes insertion
    /// order.
    pub fn restore(&self, files: Vec<FileRecord>, kbs: Vec<KnowledgeBase>) {
        for kb in kbs {
            let name = kb.name.clone();
            if self.inner.kbs.insert(name.clone(), kb).is_none() {
                write_lock(&self.inner.kb_order).insert(name);
            }
        }
        for record in files {
            let key = record.safe_key.clone();
            if self.inner.records.insert(key.clone(), record).is_none() {
                write_lock(&self.inner.record_order).insert(key);
            }
        }
    }

    /// Reconcile the registry with what is actually on disk: register
    /// knowledge-base directories, reconstruct records for stray uploads,
    /// and drop records whose bytes vanished.
    pub fn sync_from_disk(&self) -> Result<SyncReport, String> {
        let mut report = SyncReport::default();
        self.ensure_default_kb();

        let kb_root = self.inner.data_dir.join("knowledge_bases");
        let entries = std::fs::read_dir(&kb_root)
            .map_err(|e| format!("failed to read {}: {}", kb_root.display(), e))?;
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::validate_kb_name(&name).is_err() {
                warn!("ignoring knowledge base directory with unusable name: {:?}", name);
                continue;
            }
            if !self.inner.kbs.contains_key(&name) {
                let kb = KnowledgeBase {
                    name: name.clone(),
                    description: String::new(),
                    created_at: Utc::now().to_rfc3339(),
                };
                if self.inner.kbs.insert(name.clone(), kb).is_none() {
                    write_lock(&self.inner.kb_order).insert(name);
                    report.registered_kbs += 1;
                }
            }
        }

        let uploads = self.uploads_dir();
        let entries = std::fs::read_dir(&uploads)
            .map_err(|e| format!("failed to read {}: {}", uploads.display(), e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.inner.records.contains_key(&name) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping unreadable upload {:?}: {}", name, e);
                    continue;
                }
            };
            let kb = name
                .split('_')
                .next()
                .filter(|prefix| self.kb_exists(prefix))
                .unwrap_or(DEFAULT_KNOWLEDGE_BASE)
                .to_string();
            let upload_time = meta
                .modified()
                .map(|t| chrono::DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_else(|_| Utc::now().to_rfc3339());
            let record = FileRecord {
                safe_key: name.clone(),
                original_name: name.clone(),
                knowledge_base: kb,
                path: path.to_string_lossy().into_owned(),
                size: meta.len(),
                upload_time,
                status: FileStatus::Uploaded,
                progress: 0,
                message: None,
                error: None,
                epoch: 0,
            };
            if self.inner.records.insert(name.clone(), record).is_none() {
                write_lock(&self.inner.record_order).insert(name);
                report.recovered_files += 1;
            }
        }

        let stale: Vec<String> = self
            .inner
            .records
            .iter()
            .filter(|r| !Path::new(&r.path).exists())
            .map(|r| r.safe_key.clone())
            .collect();
        for key in stale {
            warn!("dropping record {} whose stored bytes are gone", key);
            self.inner.records.remove(&key);
            write_lock(&self.inner.record_order).shift_remove(&key);
            report.dropped_records += 1;
        }

        Ok(report)
    }
}
