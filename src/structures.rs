//! Core data structures shared by the gateway and the console client.

use serde::{Deserialize, Serialize};

/// Lifecycle of an uploaded file as it moves through ingestion.
///
/// Legal transitions: `Uploaded -> Processing -> Completed | Error`, and
/// reset back to `Uploaded` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Uploaded,
    Processing,
    Completed,
    Error,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(FileStatus::Uploaded),
            "processing" => Some(FileStatus::Processing),
            "completed" => Some(FileStatus::Completed),
            "error" => Some(FileStatus::Error),
            _ => None,
        }
    }
}

/// Retrieval modes understood by the engine's query endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum QueryMode {
    Naive,
    Local,
    Global,
    #[default]
    Hybrid,
}

impl QueryMode {
    pub const NAMES: [&'static str; 4] = ["naive", "local", "global", "hybrid"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "naive" => Some(QueryMode::Naive),
            "local" => Some(QueryMode::Local),
            "global" => Some(QueryMode::Global),
            "hybrid" => Some(QueryMode::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Naive => "naive",
            QueryMode::Local => "local",
            QueryMode::Global => "global",
            QueryMode::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the registry tracks about one uploaded file.
///
/// `safe_key` is the unique on-disk name (`{kb}_{token}{ext}`); the original
/// client-supplied name survives in `original_name` for display and fallback
/// resolution. `epoch` is bumped whenever a record is reset or handed to a
/// fresh ingestion task, so writes from an orphaned task can be recognized
/// and dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub safe_key: String,
    pub original_name: String,
    pub knowledge_base: String,
    pub path: String,
    pub size: u64,
    pub upload_time: String,
    pub status: FileStatus,
    pub progress: u8,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub epoch: u64,
}

/// A named collection of documents, mirrored by a directory on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
}
