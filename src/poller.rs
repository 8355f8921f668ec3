//! Client-side status poller.
//!
//! Watches one file's ingestion over [`StatusSource`] as a cancellable
//! spawned task. The first check fires immediately; afterwards the cadence
//! is two-tier (fast until the halfway mark, slower beyond it). Transport
//! failures are retried on a longer interval and budgeted: once the stall
//! counter hits [`POLL_STALL_BUDGET`](crate::config::POLL_STALL_BUDGET)
//! without progress advancing in between, the poller reports a timeout and
//! stops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{
    POLL_FAST_PHASE_CUTOFF, POLL_INTERVAL_EARLY_MS, POLL_INTERVAL_LATE_MS, POLL_RETRY_INTERVAL_MS,
    POLL_STALL_BUDGET,
};
use crate::structures::FileStatus;

/// One observation of a file's ingestion state.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: FileStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Where the poller reads status from. Implemented by the console's HTTP
/// client and by scripted fakes in tests.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn file_status(&self, file_key: &str) -> Result<StatusSnapshot, String>;
}

/// Events emitted while watching one file.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Progress { progress: u8, message: Option<String> },
    Completed,
    Failed { error: String },
    /// The record went back to `uploaded` under us (a concurrent reset).
    Reset,
    /// Stall budget exhausted on consecutive transport failures.
    TimedOut,
}

/// Handle to a running watch task.
pub struct PollHandle {
    events: mpsc::Receiver<PollEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Next event, or `None` once the watch task is done.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawn a watch task for `file_key`.
pub fn watch(source: Arc<dyn StatusSource>, file_key: String) -> PollHandle {
    let (tx, rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        poll_loop(source, file_key, tx, task_cancel).await;
    });
    PollHandle {
        events: rx,
        cancel,
        task,
    }
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    file_key: String,
    events: mpsc::Sender<PollEvent>,
    cancel: CancellationToken,
) {
    let mut stalls: u32 = 0;
    let mut last_progress: Option<u8> = None;

    loop {
        match source.file_status(&file_key).await {
            Ok(snap) => match snap.status {
                FileStatus::Completed => {
                    let _ = events.send(PollEvent::Completed).await;
                    return;
                }
                FileStatus::Error => {
                    let error = snap
                        .error
                        .unwrap_or_else(|| "ingestion failed".to_string());
                    let _ = events.send(PollEvent::Failed { error }).await;
                    return;
                }
                FileStatus::Uploaded => {
                    let _ = events.send(PollEvent::Reset).await;
                    return;
                }
                FileStatus::Processing => {
                    // advance clears the stall counter; a flat reading
                    // leaves it alone
                    if last_progress.map_or(true, |p| snap.progress > p) {
                        stalls = 0;
                    }
                    last_progress = Some(snap.progress);
                    let _ = events
                        .send(PollEvent::Progress {
                            progress: snap.progress,
                            message: snap.message,
                        })
                        .await;
                    let delay = if snap.progress < POLL_FAST_PHASE_CUTOFF {
                        Duration::from_millis(POLL_INTERVAL_EARLY_MS)
                    } else {
                        Duration::from_millis(POLL_INTERVAL_LATE_MS)
                    };
                    if wait_or_cancelled(&cancel, delay).await {
                        return;
                    }
                }
            },
            Err(e) => {
                stalls += 1;
                debug!(
                    "status poll for {} failed ({} consecutive): {}",
                    file_key, stalls, e
                );
                if stalls >= POLL_STALL_BUDGET {
                    let _ = events.send(PollEvent::TimedOut).await;
                    return;
                }
                if wait_or_cancelled(&cancel, Duration::from_millis(POLL_RETRY_INTERVAL_MS)).await {
                    return;
                }
            }
        }
    }
}

/// True when cancellation won the race.
async fn wait_or_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
