//! Typed progress events and the channel they are published on.
//!
//! The pipeline pushes [`ProgressEvent`]s into an [`Emitter`]; transports
//! (see [`crate::transport`]) drain the receiving end. A dropped receiver
//! silences the emitter without affecting the batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use sitesort_shared::{BatchId, ClassificationResult};

use crate::normalize::RejectedDomain;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// One message of the progress stream, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Emitted after every concluded domain, before its `result`.
    Progress {
        processed: usize,
        total: usize,
        percent: u8,
        message: String,
    },
    /// The result for the domain announced by the preceding `progress`.
    Result {
        result: ClassificationResult,
        processed: usize,
        total: usize,
        percent: u8,
    },
    /// Final summary; always the last event of a successful batch.
    Complete(BatchSummary),
    /// Batch-aborting failure; nothing follows.
    Error { message: String },
}

impl ProgressEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Result { .. } => "result",
            Self::Complete(_) => "complete",
            Self::Error { .. } => "error",
        }
    }
}

/// Completion payload, also returned directly in non-streaming mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    /// Every result of the batch (reused and new), in completion order.
    pub results: Vec<ClassificationResult>,
    /// Domains processed in this run (excludes reused results).
    pub total_processed: usize,
    pub succeeded: usize,
    pub errors: usize,
    pub skipped: usize,
    #[serde(default)]
    pub rejected: Vec<RejectedDomain>,
    pub message: String,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    pub duration_text: String,
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

/// `"S second(s)"` or `"M minute(s) S second(s)"`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    let plural = |n: u64| if n == 1 { "" } else { "s" };

    if minutes == 0 {
        format!("{seconds} second{}", plural(seconds))
    } else {
        format!(
            "{minutes} minute{} {seconds} second{}",
            plural(minutes),
            plural(seconds)
        )
    }
}

/// Human-readable completion line.
pub fn completion_message(duration_text: &str, processed: usize, skipped: usize) -> String {
    match (processed, skipped) {
        (0, 0) => format!("Scan complete in {duration_text}! No domains to process"),
        (0, s) => format!(
            "Scan complete in {duration_text}! {s} domains already in database. Use overwrite option to reprocess."
        ),
        (p, 0) => format!("Scan complete in {duration_text}! Processed {p} new domains"),
        (p, s) => format!(
            "Scan complete in {duration_text}! Processed {p} new domains, skipped {s} existing domains"
        ),
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Sending half of the progress stream.
#[derive(Debug)]
pub struct Emitter {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    closed: AtomicBool,
}

impl Emitter {
    /// Create an emitter and the receiver a transport should drain.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// An emitter that discards every event.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            closed: AtomicBool::new(true),
        }
    }

    /// Whether events are still being delivered.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Deliver one event. Once the receiver is gone, events are dropped silently.
    pub async fn emit(&self, event: ProgressEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if !self.is_open() {
            return;
        }
        if tx.send(event).await.is_err() && !self.closed.swap(true, Ordering::SeqCst) {
            debug!("progress consumer disconnected, dropping further events");
        }
    }
}
