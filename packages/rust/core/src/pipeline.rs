//! Batch orchestration: normalize, dedup, schedule, track, report.
//!
//! [`Pipeline::run`] drives one submission end to end and publishes
//! [`ProgressEvent`]s through the given [`Emitter`].
//! [`Pipeline::run_streaming`] spawns the same run and hands back the
//! receiving end, and [`Pipeline::run_to_completion`] only returns the final
//! [`BatchSummary`].
//!
//! Every run takes its own [`CancellationToken`]. Cancelling it stops that
//! batch from starting new domains and leaves other batches untouched.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use sitesort_shared::{
    BatchId, ClassificationResult, PipelineSettings, ProcessingConfig, Result, SitesortError,
};

use crate::dedup::partition_domains;
use crate::events::{BatchSummary, Emitter, ProgressEvent, completion_message, format_duration};
use crate::normalize::{NormalizedInput, normalize_domains};
use crate::scheduler::{Collaborators, OutcomeSink, Scheduler};
use crate::task::TaskOutcome;
use crate::tracker::{BatchTracker, Outcome, Progress};

/// Entry point for classification batches.
///
/// Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct Pipeline {
    collaborators: Collaborators,
    settings: Arc<PipelineSettings>,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            settings: Arc::new(settings),
        }
    }

    /// Run a batch in the background and return its event stream.
    pub fn run_streaming(
        &self,
        raw_domains: Vec<String>,
        config: ProcessingConfig,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ProgressEvent> {
        let (emitter, rx) = Emitter::channel(self.settings.event_buffer);
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run(raw_domains, config, emitter, cancel).await {
                debug!(error = %e, "streamed batch aborted");
            }
        });
        rx
    }

    /// Run a batch without streaming and return the completion payload.
    pub async fn run_to_completion(
        &self,
        raw_domains: Vec<String>,
        config: ProcessingConfig,
        cancel: CancellationToken,
    ) -> Result<BatchSummary> {
        self.run(raw_domains, config, Emitter::disabled(), cancel)
            .await
    }

    /// Run one batch end to end.
    ///
    /// Per-domain failures become `Error` results. Only batch-aborting
    /// conditions (invalid config, no valid domains, batch record not
    /// creatable) return `Err`, after a single `error` event.
    #[instrument(skip_all, fields(entries = raw_domains.len(), method = %config.method))]
    pub async fn run(
        &self,
        raw_domains: Vec<String>,
        config: ProcessingConfig,
        emitter: Emitter,
        cancel: CancellationToken,
    ) -> Result<BatchSummary> {
        let started = Instant::now();

        if let Err(e) = config.validate() {
            return abort(&emitter, e).await;
        }

        let NormalizedInput { valid, rejected } = normalize_domains(&raw_domains);
        for entry in &rejected {
            info!(input = %entry.domain, reason = %entry.reason, "rejected domain");
        }
        if valid.is_empty() {
            return abort(
                &emitter,
                SitesortError::Fatal("no valid domains provided".into()),
            )
            .await;
        }

        let store = self.collaborators.store.as_ref();
        let plan = partition_domains(valid, config.overwrite, store).await;

        let batch_id = BatchId::new();
        let total = plan.skip.len() + plan.process.len();
        let process_count = plan.process.len();
        let tracker = BatchTracker::new(batch_id.clone(), total, config.clone());

        if let Err(e) = store.create_batch(&tracker.snapshot()).await {
            return abort(
                &emitter,
                SitesortError::Fatal(format!("could not create batch record: {e}")),
            )
            .await;
        }
        info!(
            %batch_id,
            total,
            skip = plan.skip.len(),
            process = process_count,
            mode = %config.processing_mode(),
            "batch started"
        );

        let reporter = Arc::new(Reporter {
            tracker,
            emitter,
            results: Mutex::new(Vec::with_capacity(total)),
        });

        for existing in plan.skip {
            let reused = existing.with_batch(batch_id.clone());
            debug!(domain = %reused.domain, label = %reused.classification_label, "reusing stored result");
            reporter.report(reused, Outcome::Skipped).await;
        }

        let scheduler = Scheduler::new(self.collaborators.clone(), self.settings.clone(), cancel);
        scheduler
            .run(plan.process, &config, &batch_id, reporter.clone())
            .await;

        let record = reporter.tracker.snapshot();
        if !reporter.tracker.is_completed() {
            warn!(
                processed = record.processed,
                total, "batch finished with unreported domains"
            );
        }
        if let Err(e) = store.complete_batch(&record).await {
            warn!(%batch_id, error = %e, "failed to record batch completion");
        }

        let results = std::mem::take(&mut *reporter.results.lock().await);
        let elapsed = started.elapsed();
        let duration_text = format_duration(elapsed);
        let summary = BatchSummary {
            batch_id,
            results,
            total_processed: process_count,
            succeeded: record.succeeded,
            errors: record.failed,
            skipped: record.skipped,
            rejected,
            message: completion_message(&duration_text, process_count, record.skipped),
            duration: elapsed.as_secs_f64(),
            duration_text,
        };

        info!(
            batch_id = %summary.batch_id,
            succeeded = summary.succeeded,
            errors = summary.errors,
            skipped = summary.skipped,
            rejected = summary.rejected.len(),
            duration = %summary.duration_text,
            "batch complete"
        );
        reporter
            .emitter
            .emit(ProgressEvent::Complete(summary.clone()))
            .await;
        Ok(summary)
    }
}

async fn abort(emitter: &Emitter, e: SitesortError) -> Result<BatchSummary> {
    error!(error = %e, "batch aborted");
    emitter
        .emit(ProgressEvent::Error {
            message: e.to_string(),
        })
        .await;
    Err(e)
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Serializes counter updates with their `progress`/`result` pair.
struct Reporter {
    tracker: BatchTracker,
    emitter: Emitter,
    results: Mutex<Vec<ClassificationResult>>,
}

impl Reporter {
    async fn report(&self, result: ClassificationResult, outcome: Outcome) {
        let mut results = self.results.lock().await;
        let progress = self.tracker.record(outcome);
        let percent = progress.percent();

        self.emitter
            .emit(ProgressEvent::Progress {
                processed: progress.processed,
                total: progress.total,
                percent,
                message: progress_message(&progress, &result, outcome),
            })
            .await;
        self.emitter
            .emit(ProgressEvent::Result {
                result: result.clone(),
                processed: progress.processed,
                total: progress.total,
                percent,
            })
            .await;
        results.push(result);

        if progress.completed_now {
            debug!(total = progress.total, "all domains concluded");
        }
    }
}

#[async_trait]
impl OutcomeSink for Reporter {
    async fn finished(&self, outcome: TaskOutcome) {
        let kind = outcome.outcome();
        self.report(outcome.result, kind).await;
    }
}

fn progress_message(progress: &Progress, result: &ClassificationResult, outcome: Outcome) -> String {
    let (n, total, domain) = (progress.processed, progress.total, &result.domain);
    match outcome {
        Outcome::Succeeded => format!("Completed {n}/{total}: {domain}"),
        Outcome::Failed => format!("Completed {n}/{total} (with error): {domain}"),
        Outcome::Skipped => format!("Skipped {n}/{total}: {domain} (already in database)"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use sitesort_shared::{BatchStatus, ClassificationLabel, Domain, ExtractionMethod};

    use super::*;
    use crate::scheduler::CANCELLED_SUMMARY;
    use crate::testing::{
        MemoryStore, MockClassifier, MockExtractorFactory, MockFetcher, classification,
    };

    struct Fixture {
        fetcher: Arc<MockFetcher>,
        classifier: Arc<MockClassifier>,
        store: Arc<MemoryStore>,
        pipeline: Pipeline,
    }

    fn fixture(fetcher: MockFetcher, classifier: MockClassifier, store: MemoryStore) -> Fixture {
        let fetcher = Arc::new(fetcher);
        let classifier = Arc::new(classifier);
        let store = Arc::new(store);
        let settings = PipelineSettings {
            fetch_timeout: Duration::from_millis(200),
            anti_detection_fetch_timeout: Duration::from_millis(300),
            extract_timeout: Duration::from_millis(200),
            classify_timeout: Duration::from_millis(200),
            event_buffer: 64,
        };
        let pipeline = Pipeline::new(
            Collaborators {
                fetcher: fetcher.clone(),
                extractors: Arc::new(MockExtractorFactory::default()),
                classifier: classifier.clone(),
                store: store.clone(),
            },
            settings,
        );
        Fixture {
            fetcher,
            classifier,
            store,
            pipeline,
        }
    }

    impl Fixture {
        async fn classify(
            &self,
            domains: Vec<String>,
            config: ProcessingConfig,
        ) -> Result<BatchSummary> {
            self.pipeline
                .run_to_completion(domains, config, CancellationToken::new())
                .await
        }

        fn stream(
            &self,
            domains: Vec<String>,
            config: ProcessingConfig,
        ) -> mpsc::Receiver<ProgressEvent> {
            self.pipeline
                .run_streaming(domains, config, CancellationToken::new())
        }
    }

    fn default_fixture() -> Fixture {
        fixture(
            MockFetcher::default(),
            MockClassifier::default(),
            MemoryStore::default(),
        )
    }

    fn raw(domains: &[&str]) -> Vec<String> {
        domains.iter().map(|d| d.to_string()).collect()
    }

    fn stored(domain: &str, label: ClassificationLabel) -> ClassificationResult {
        ClassificationResult {
            domain: Domain::new(domain),
            classification_label: label,
            summary: "stored earlier".into(),
            confidence_level: 0.8,
            snippet: String::new(),
            extraction_method: ExtractionMethod::Html,
            processed_at: Utc::now(),
            batch_id: BatchId::from("batch_previous"),
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn mixed_batch_skips_rejects_and_processes() {
        let f = default_fixture();
        f.store.seed(stored("google.com", ClassificationLabel::Portal));

        let summary = f
            .classify(
                raw(&["google.com", "bad..domain", "amazon.com"]),
                ProcessingConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(summary.rejected.len(), 1);
        assert_eq!(summary.rejected[0].domain, "bad..domain");
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_processed, 1);
        assert_eq!(summary.results.len(), 2);
        assert!(summary.message.contains("Processed 1 new domains, skipped 1 existing domains"));

        let google = &summary.results[0];
        assert_eq!(google.domain.as_str(), "google.com");
        assert_eq!(google.classification_label, ClassificationLabel::Portal);
        assert_eq!(google.batch_id, summary.batch_id);

        assert_eq!(f.classifier.calls(), 1);
        // Reused results are not written again.
        assert_eq!(f.store.rows().len(), 2);
    }

    #[tokio::test]
    async fn fetch_timeout_becomes_error_result() {
        let f = fixture(
            MockFetcher::default().hang_on("unreachable.test"),
            MockClassifier::default(),
            MemoryStore::default(),
        );

        let summary = f
            .classify(raw(&["unreachable.test"]), ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.errors, 1);
        let result = &summary.results[0];
        assert!(result.is_error());
        assert_eq!(result.confidence_level, 0.0);

        let batch = f.store.batch(&summary.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.failed, 1);
        assert!(batch.completed_at.is_some());
    }

    #[tokio::test]
    async fn headful_batches_run_two_at_a_time() {
        let f = fixture(
            MockFetcher::default().with_delay(Duration::from_millis(20)),
            MockClassifier::default().with_delay(Duration::from_millis(20)),
            MemoryStore::default(),
        );
        let config = ProcessingConfig {
            headless: false,
            workers: 8,
            ..ProcessingConfig::default()
        };
        let domains: Vec<String> = (0..10).map(|i| format!("site{i}.com")).collect();

        let summary = f.classify(domains, config).await.unwrap();

        assert_eq!(summary.results.len(), 10);
        assert_eq!(f.fetcher.calls(), 10);
        assert!(f.fetcher.max_in_flight() <= 2);
        assert_eq!(f.classifier.calls(), 10);
        assert!(f.classifier.max_in_flight() <= 2);
        assert!(f.classifier.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn both_method_concatenates_html_then_ocr() {
        let f = default_fixture();
        let config = ProcessingConfig {
            method: ExtractionMethod::Both,
            ..ProcessingConfig::default()
        };

        let summary = f
            .classify(raw(&["acme.com"]), config)
            .await
            .unwrap();

        assert_eq!(summary.results[0].extraction_method, ExtractionMethod::Both);
        assert_eq!(
            f.classifier.inputs(),
            vec!["html text of acme.com\nocr text of acme.com".to_string()]
        );
    }

    #[tokio::test]
    async fn second_run_skips_previous_successes_only() {
        let f = fixture(
            MockFetcher::default().failing_on("down.com"),
            MockClassifier::default(),
            MemoryStore::default(),
        );
        let domains = raw(&["a.com", "b.com", "down.com"]);

        let first = f
            .classify(domains.clone(), ProcessingConfig::default())
            .await
            .unwrap();
        assert_eq!(first.errors, 1);
        assert_eq!(f.classifier.calls(), 2);

        let second = f
            .classify(domains, ProcessingConfig::default())
            .await
            .unwrap();
        assert_eq!(second.skipped, 2);
        assert_eq!(second.total_processed, 1);
        assert_eq!(f.classifier.calls(), 2);
        assert_eq!(f.fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn overwrite_reprocesses_stored_domains() {
        let f = default_fixture();
        f.store.seed(stored("google.com", ClassificationLabel::Portal));
        let config = ProcessingConfig {
            overwrite: true,
            ..ProcessingConfig::default()
        };

        let summary = f
            .classify(raw(&["google.com"]), config)
            .await
            .unwrap();

        assert_eq!(summary.skipped, 0);
        assert_eq!(
            summary.results[0].classification_label,
            ClassificationLabel::Marketing
        );
        assert_eq!(f.classifier.calls(), 1);
    }

    #[tokio::test]
    async fn stream_is_ordered_and_ends_with_complete() {
        let f = default_fixture();
        f.store.seed(stored("old.com", ClassificationLabel::Other));

        let rx = f.stream(
            raw(&["old.com", "a.com", "b.com", "c.com"]),
            ProcessingConfig::default(),
        );
        let events = collect(rx).await;

        // Four progress/result pairs plus the completion event.
        assert_eq!(events.len(), 9);
        for (i, pair) in events[..8].chunks(2).enumerate() {
            let ProgressEvent::Progress {
                processed, total, ..
            } = &pair[0]
            else {
                panic!("expected progress, got {:?}", pair[0]);
            };
            let ProgressEvent::Result {
                processed: result_processed,
                ..
            } = &pair[1]
            else {
                panic!("expected result, got {:?}", pair[1]);
            };
            assert_eq!(*processed, i + 1);
            assert_eq!(*result_processed, i + 1);
            assert_eq!(*total, 4);
        }

        let full = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Progress { percent: 100, .. }))
            .count();
        assert_eq!(full, 1);

        match &events[0] {
            ProgressEvent::Progress { message, .. } => {
                assert_eq!(message, "Skipped 1/4: old.com (already in database)");
            }
            other => panic!("unexpected first event {other:?}"),
        }
        match events.last() {
            Some(ProgressEvent::Complete(summary)) => {
                assert_eq!(summary.results.len(), 4);
                assert_eq!(summary.skipped, 1);
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_valid_domains_is_fatal() {
        let f = default_fixture();

        let events = collect(
            f.stream(raw(&["bad..domain", "  "]), ProcessingConfig::default()),
        )
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "error");

        let err = f
            .classify(raw(&["nodot"]), ProcessingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SitesortError::Fatal(_)));
        assert_eq!(f.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let f = default_fixture();
        let config = ProcessingConfig {
            workers: 0,
            ..ProcessingConfig::default()
        };

        let err = f
            .classify(raw(&["acme.com"]), config)
            .await
            .unwrap_err();
        assert!(matches!(err, SitesortError::Validation { .. }));
    }

    #[tokio::test]
    async fn batch_record_failure_aborts_before_work() {
        let f = fixture(
            MockFetcher::default(),
            MockClassifier::default(),
            MemoryStore::default().failing_batches(),
        );

        let events = collect(
            f.stream(raw(&["acme.com"]), ProcessingConfig::default()),
        )
        .await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            ProgressEvent::Error { message } => assert!(message.contains("batch record")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(f.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn lookup_failure_processes_everything() {
        let f = fixture(
            MockFetcher::default(),
            MockClassifier::default(),
            MemoryStore::default().failing_reads(),
        );
        f.store.seed(stored("google.com", ClassificationLabel::Portal));

        let summary = f
            .classify(raw(&["google.com", "amazon.com"]), ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.total_processed, 2);
        assert_eq!(f.classifier.calls(), 2);
    }

    #[tokio::test]
    async fn persist_failure_counts_as_error_but_reports_result() {
        let f = fixture(
            MockFetcher::default(),
            MockClassifier::default(),
            MemoryStore::default().failing_writes(),
        );

        let summary = f
            .classify(raw(&["acme.com", "other.com"]), ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.errors, 2);
        assert!(summary.results.iter().all(|r| !r.is_error()));
    }

    #[tokio::test]
    async fn classify_timeout_is_contained() {
        let f = fixture(
            MockFetcher::default(),
            MockClassifier::default().stalled(),
            MemoryStore::default(),
        );

        let summary = f
            .classify(raw(&["slow.com"]), ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.errors, 1);
        assert!(summary.results[0].summary.contains("timed out"));
    }

    #[tokio::test]
    async fn per_domain_labels_flow_through() {
        let f = fixture(
            MockFetcher::default(),
            MockClassifier::default()
                .with_answer_for("github.com", classification(ClassificationLabel::Portal, 0.95)),
            MemoryStore::default(),
        );

        let summary = f
            .classify(raw(&["github.com", "shop.com"]), ProcessingConfig::default())
            .await
            .unwrap();

        let label_of = |d: &str| {
            summary
                .results
                .iter()
                .find(|r| r.domain.as_str() == d)
                .map(|r| r.classification_label)
        };
        assert_eq!(label_of("github.com"), Some(ClassificationLabel::Portal));
        assert_eq!(label_of("shop.com"), Some(ClassificationLabel::Marketing));
        assert_eq!(summary.succeeded, 2);
    }

    #[tokio::test]
    async fn cancelled_batch_concludes_without_fetching() {
        let f = default_fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = f
            .pipeline
            .run_to_completion(raw(&["a.com", "b.com"]), ProcessingConfig::default(), cancel)
            .await
            .unwrap();

        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.errors, 2);
        assert!(summary.results.iter().all(|r| r.summary == CANCELLED_SUMMARY));
        assert_eq!(f.fetcher.calls(), 0);
        assert!(f.store.rows().is_empty());

        let batch = f.store.batch(&summary.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn cancelling_one_batch_leaves_the_next_alone() {
        let f = default_fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let first = f
            .pipeline
            .run_to_completion(raw(&["a.com"]), ProcessingConfig::default(), cancel)
            .await
            .unwrap();
        assert_eq!(first.errors, 1);

        let second = f
            .classify(raw(&["b.com", "c.com"]), ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(second.errors, 0);
        assert_eq!(second.succeeded, 2);
        assert_eq!(f.fetcher.calls(), 2);
        assert!(second.results.iter().all(|r| r.summary != CANCELLED_SUMMARY));
    }

    #[tokio::test]
    async fn dropped_consumer_does_not_stop_the_batch() {
        let f = default_fixture();
        let (emitter, rx) = Emitter::channel(1);
        drop(rx);

        let summary = f
            .pipeline
            .run(
                raw(&["a.com", "b.com", "c.com"]),
                ProcessingConfig::default(),
                emitter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.results.len(), 3);
        assert_eq!(f.store.rows().len(), 3);
    }
}
