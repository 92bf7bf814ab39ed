//! Bounded worker pool running one task per domain.
//!
//! `C` worker loops share a queue. Each worker owns the extractor it gets
//! from the [`ExtractorFactory`], so OCR engines are never shared.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use sitesort_classifier::Classifier;
use sitesort_extract::ExtractorFactory;
use sitesort_fetcher::Fetcher;
use sitesort_shared::{
    BatchId, ClassificationResult, Domain, PipelineSettings, ProcessingConfig,
};

use crate::store::ResultStore;
use crate::task::{TaskContext, TaskOutcome, TaskState, run_task};

/// Summary used for domains that were never started because of cancellation.
pub const CANCELLED_SUMMARY: &str = "batch cancelled before processing started";

/// Receives every terminal task outcome, in completion order.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn finished(&self, outcome: TaskOutcome);
}

/// Collaborators shared by every worker of a pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub extractors: Arc<dyn ExtractorFactory>,
    pub classifier: Arc<dyn Classifier>,
    pub store: Arc<dyn ResultStore>,
}

/// Number of concurrent tasks for a batch.
///
/// Headful browsing is capped at two windows.
pub fn effective_concurrency(config: &ProcessingConfig) -> usize {
    let workers = if config.headless {
        config.workers
    } else {
        config.workers.min(2)
    };
    workers.max(1)
}

/// Runs the process set of one batch.
pub struct Scheduler {
    collaborators: Collaborators,
    settings: Arc<PipelineSettings>,
    cancel: CancellationToken,
}

struct WorkerShared {
    collaborators: Collaborators,
    settings: Arc<PipelineSettings>,
    config: ProcessingConfig,
    batch_id: BatchId,
    queue: Mutex<VecDeque<Domain>>,
    cancel: CancellationToken,
    sink: Arc<dyn OutcomeSink>,
}

impl Scheduler {
    pub fn new(
        collaborators: Collaborators,
        settings: Arc<PipelineSettings>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            collaborators,
            settings,
            cancel,
        }
    }

    /// Run every domain to a terminal outcome.
    ///
    /// Returns once each domain has been handed to `sink` exactly once.
    #[instrument(skip_all, fields(batch_id = %batch_id, domains = domains.len()))]
    pub async fn run(
        &self,
        domains: Vec<Domain>,
        config: &ProcessingConfig,
        batch_id: &BatchId,
        sink: Arc<dyn OutcomeSink>,
    ) {
        if domains.is_empty() {
            return;
        }

        let concurrency = effective_concurrency(config).min(domains.len());
        info!(concurrency, "starting workers");

        let shared = Arc::new(WorkerShared {
            collaborators: self.collaborators.clone(),
            settings: self.settings.clone(),
            config: config.clone(),
            batch_id: batch_id.clone(),
            queue: Mutex::new(domains.into()),
            cancel: self.cancel.clone(),
            sink,
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(worker_loop(worker_id, shared.clone()));
        }

        let mut last_init_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(handled)) => debug!(handled, "worker finished"),
                Ok(Err(init_error)) => last_init_error = Some(init_error),
                Err(e) => warn!(error = %e, "worker task panicked"),
            }
        }

        drain_leftovers(&shared, last_init_error).await;
    }
}

/// Pull domains until the queue is empty or the batch is cancelled.
///
/// Returns the number of domains handled, or the extractor initialization
/// error if this worker never started.
async fn worker_loop(worker_id: usize, shared: Arc<WorkerShared>) -> Result<usize, String> {
    let mut extractor = match shared.collaborators.extractors.create(worker_id) {
        Ok(extractor) => extractor,
        Err(e) => {
            warn!(worker_id, error = %e, "worker could not create its extractor");
            return Err(e.cause());
        }
    };

    let ctx = TaskContext {
        fetcher: shared.collaborators.fetcher.as_ref(),
        classifier: shared.collaborators.classifier.as_ref(),
        store: shared.collaborators.store.as_ref(),
        config: &shared.config,
        settings: &shared.settings,
        batch_id: &shared.batch_id,
    };

    let mut handled = 0;
    loop {
        if shared.cancel.is_cancelled() {
            debug!(worker_id, "cancelled, not starting new tasks");
            break;
        }
        let Some(domain) = shared.queue.lock().await.pop_front() else {
            break;
        };

        let outcome = run_task(ctx, &mut *extractor, domain).await;
        shared.sink.finished(outcome).await;
        handled += 1;
    }
    Ok(handled)
}

/// Conclude domains no worker picked up.
///
/// This happens after cancellation, or when every worker failed to start.
async fn drain_leftovers(shared: &WorkerShared, init_error: Option<String>) {
    let leftovers: Vec<Domain> = shared.queue.lock().await.drain(..).collect();
    if leftovers.is_empty() {
        return;
    }

    let cancelled = shared.cancel.is_cancelled();
    let cause = match (cancelled, init_error) {
        (true, _) => CANCELLED_SUMMARY.to_string(),
        (false, Some(e)) => format!("no worker available: {e}"),
        (false, None) => "no worker available".to_string(),
    };
    warn!(count = leftovers.len(), cause = %cause, "concluding unprocessed domains");

    for domain in leftovers {
        let result = ClassificationResult::error(
            domain,
            cause.clone(),
            shared.config.method,
            shared.batch_id.clone(),
        );
        if !cancelled {
            if let Err(e) = shared.collaborators.store.insert(&result).await {
                warn!(domain = %result.domain, error = %e, "failed to persist error result");
            }
        }
        shared
            .sink
            .finished(TaskOutcome {
                result,
                state: TaskState::Failed,
                failed_stage: Some(TaskState::Queued),
            })
            .await;
    }
}
