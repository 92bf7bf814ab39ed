//! Live counters for one batch run.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use sitesort_shared::{BatchId, BatchRecord, BatchStatus, ProcessingConfig};

/// How a domain's slot in the batch concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    /// Reused a stored result. Counts as succeeded.
    Skipped,
}

/// Counter values right after recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// True for exactly one call: the one that reached `processed == total`.
    pub completed_now: bool,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        percent(self.processed, self.total)
    }
}

/// `round(processed / total * 100)`, 100 for an empty batch.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Batch metadata plus atomically updated counters.
///
/// Each outcome must be recorded exactly once. The tracker moves to
/// `completed` once, when the last outcome lands.
#[derive(Debug)]
pub struct BatchTracker {
    batch_id: BatchId,
    total: usize,
    config: ProcessingConfig,
    started_at: DateTime<Utc>,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    completed: AtomicBool,
    completed_at: OnceLock<DateTime<Utc>>,
}

impl BatchTracker {
    pub fn new(batch_id: BatchId, total: usize, config: ProcessingConfig) -> Self {
        Self {
            batch_id,
            total,
            config,
            started_at: Utc::now(),
            processed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
            completed_at: OnceLock::new(),
        }
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Count one concluded domain.
    pub fn record(&self, outcome: Outcome) -> Progress {
        match outcome {
            Outcome::Succeeded => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
        }

        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let completed_now = processed >= self.total && self.mark_completed();

        Progress {
            processed,
            total: self.total,
            completed_now,
        }
    }

    /// Move to `completed` if not already there. Returns whether this call did it.
    pub fn mark_completed(&self) -> bool {
        let won = self
            .completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            let _ = self.completed_at.set(Utc::now());
        }
        won
    }

    /// Current state as a storable record.
    pub fn snapshot(&self) -> BatchRecord {
        let completed = self.is_completed();
        BatchRecord {
            batch_id: self.batch_id.clone(),
            total_domains: self.total,
            config: self.config.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at.get().copied(),
            status: if completed {
                BatchStatus::Completed
            } else {
                BatchStatus::Processing
            },
            processed: self.processed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}
