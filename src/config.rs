/// Service tuning configuration for the ragbridge gateway and console

// Server defaults (overridable from the CLI)
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:8001";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:4000";
pub const DEFAULT_KNOWLEDGE_BASE: &str = "default";

// Safe key shape: {kb}_{token}{ext}
pub const SAFE_KEY_TOKEN_LEN: usize = 8;
pub const SAFE_KEY_RETRY_LIMIT: usize = 16;

// Multipart uploads are buffered in memory before hitting disk
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

// Retrieval engine timeouts (seconds)
pub const ENGINE_HEALTH_TIMEOUT_SECS: u64 = 5;
pub const ENGINE_QUERY_TIMEOUT_SECS: u64 = 60;
// Large documents can legitimately take hours to index
pub const ENGINE_INSERT_TIMEOUT_SECS: u64 = 14_400;
pub const ENGINE_PROGRESS_POLL_SECS: u64 = 2;

// Engine-reported progress is merged into this band while the insert runs,
// so the staged narration below 31 and the verification step above 89 keep
// their slots
pub const MERGE_PROGRESS_FLOOR: u8 = 31;
pub const MERGE_PROGRESS_CEIL: u8 = 89;

// Pacing between the early narration stages of an ingestion task
pub const STAGE_PACING_MS: u64 = 400;

// Console status poller: fast cadence until the halfway mark, slower after,
// and a bounded number of consecutive transport failures before giving up
pub const POLL_INTERVAL_EARLY_MS: u64 = 1_000;
pub const POLL_INTERVAL_LATE_MS: u64 = 3_000;
pub const POLL_RETRY_INTERVAL_MS: u64 = 5_000;
pub const POLL_FAST_PHASE_CUTOFF: u8 = 50;
pub const POLL_STALL_BUDGET: u32 = 5;

// Console query history window
pub const QUERY_HISTORY_CAP: usize = 10;

// Background registry snapshots
pub const SNAPSHOT_INTERVAL_SECS: u64 = 60;
