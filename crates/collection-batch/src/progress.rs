//! Progress event types and broadcast channel for live run telemetry.
//!
//! The runner emits `ProgressEvent`s as the batch advances, which flow
//! through a `tokio::sync::broadcast` channel to every subscriber (console
//! renderer, tests). When no subscriber exists, events are silently dropped.

use crate::types::{AcquisitionStatus, InstallStatus};
use serde::{Deserialize, Serialize};

/// A progress event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    pub event: ProgressEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEventKind {
    /// The browser session is attached.
    SessionReady {
        endpoint: String,
        browser: Option<String>,
        launched: bool,
    },
    /// The collection queue was extracted.
    QueueExtracted { total: usize, processing: usize },
    /// An entry is about to be acquired.
    EntryStarted {
        position: usize,
        total: usize,
        identifier: String,
        display_name: String,
    },
    /// One strategy gave up on an entry; the chain continues.
    StrategyFailed {
        identifier: String,
        strategy: String,
        detail: String,
    },
    /// The strategy chain finished an entry.
    EntryAcquired {
        identifier: String,
        status: AcquisitionStatus,
        strategy: Option<String>,
        elapsed_ms: u64,
    },
    EntryInstalled {
        identifier: String,
        status: InstallStatus,
        files_copied: usize,
    },
    RunFinished {
        completed: usize,
        needing_attention: usize,
        elapsed_ms: u64,
    },
    /// A non-fatal warning occurred.
    Warning { message: String },
}

/// Sender handle for emitting progress events.
pub type ProgressSender = tokio::sync::broadcast::Sender<ProgressEvent>;

/// Receiver handle for consuming progress events.
pub type ProgressReceiver = tokio::sync::broadcast::Receiver<ProgressEvent>;

/// Create a new progress broadcast channel with a bounded buffer.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Emit a progress event, ignoring send errors (no receivers listening).
pub fn emit(tx: &Option<ProgressSender>, run_id: &str, seq: &mut u64, event: ProgressEventKind) {
    if let Some(ref sender) = tx {
        *seq += 1;
        let _ = sender.send(ProgressEvent {
            run_id: run_id.to_string(),
            seq: *seq,
            event,
        });
    }
}
