//! Per-domain task: Fetch -> Extract -> Classify -> Persist -> Report.
//!
//! Every failure is contained here. A task always ends with exactly one
//! [`ClassificationResult`]; failed tasks synthesize an `Error` result.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use sitesort_classifier::{Classification, Classifier};
use sitesort_extract::{ExtractionSource, Extractor};
use sitesort_fetcher::{FetchOptions, FetchedPayload, Fetcher};
use sitesort_shared::{
    BatchId, ClassificationLabel, ClassificationResult, Domain, ExtractionMethod,
    PipelineSettings, ProcessingConfig, Result, SitesortError,
};

use crate::store::ResultStore;
use crate::tracker::Outcome;

/// Lifecycle of one domain within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Fetching,
    Extracting,
    Classifying,
    Persisting,
    Done,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Collaborators and settings shared by all tasks of a batch.
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub classifier: &'a dyn Classifier,
    pub store: &'a dyn ResultStore,
    pub config: &'a ProcessingConfig,
    pub settings: &'a PipelineSettings,
    pub batch_id: &'a BatchId,
}

/// Terminal result of one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub result: ClassificationResult,
    /// `Done` or `Failed`.
    pub state: TaskState,
    /// Stage that failed, when `state == Failed`.
    pub failed_stage: Option<TaskState>,
}

impl TaskOutcome {
    /// How the tracker should count this task.
    pub fn outcome(&self) -> Outcome {
        if self.state == TaskState::Failed || self.result.is_error() {
            Outcome::Failed
        } else {
            Outcome::Succeeded
        }
    }
}

/// Drive one domain through every stage.
pub async fn run_task(
    ctx: TaskContext<'_>,
    extractor: &mut dyn Extractor,
    domain: Domain,
) -> TaskOutcome {
    let mut state = TaskState::Queued;
    let method = ctx.config.method;

    advance(&domain, &mut state, TaskState::Fetching);
    let payload = match fetch(&ctx, &domain).await {
        Ok(payload) => payload,
        Err(e) => return fail(&ctx, domain, state, e).await,
    };

    advance(&domain, &mut state, TaskState::Extracting);
    let text = match extract(&ctx, extractor, &payload).await {
        Ok(text) => text,
        Err(e) => return fail(&ctx, domain, state, e).await,
    };
    drop(payload);

    advance(&domain, &mut state, TaskState::Classifying);
    let classification = match classify(&ctx, &domain, &text).await {
        Ok(c) => c,
        Err(e) => return fail(&ctx, domain, state, e).await,
    };

    let result = ClassificationResult {
        domain: domain.clone(),
        classification_label: classification.label,
        summary: classification.summary,
        confidence_level: classification.confidence,
        snippet: classification.snippet,
        extraction_method: method,
        processed_at: Utc::now(),
        batch_id: ctx.batch_id.clone(),
    };

    advance(&domain, &mut state, TaskState::Persisting);
    if let Err(e) = ctx.store.insert(&result).await {
        warn!(%domain, error = %e, "failed to persist result");
        return TaskOutcome {
            result,
            state: TaskState::Failed,
            failed_stage: Some(TaskState::Persisting),
        };
    }

    advance(&domain, &mut state, TaskState::Done);
    TaskOutcome {
        result,
        state,
        failed_stage: None,
    }
}

fn advance(domain: &Domain, state: &mut TaskState, next: TaskState) {
    debug!(%domain, from = ?*state, to = ?next, "task transition");
    *state = next;
}

async fn fetch(ctx: &TaskContext<'_>, domain: &Domain) -> Result<FetchedPayload> {
    let timeout = ctx.settings.fetch_timeout_for(ctx.config.anti_detection);
    let options = FetchOptions {
        headless: ctx.config.headless,
        anti_detection: ctx.config.anti_detection,
        screenshot: ctx.config.method.needs_screenshot(),
        timeout,
    };

    tokio::time::timeout(timeout, ctx.fetcher.fetch(domain, &options))
        .await
        .map_err(|_| {
            SitesortError::Fetch(format!("{domain}: timed out after {}", timeout_text(timeout)))
        })?
}

async fn extract(
    ctx: &TaskContext<'_>,
    extractor: &mut dyn Extractor,
    payload: &FetchedPayload,
) -> Result<String> {
    let timeout = ctx.settings.extract_timeout;
    tokio::time::timeout(timeout, extract_text(extractor, payload, ctx.config.method))
        .await
        .map_err(|_| SitesortError::Extract(format!("timed out after {}", timeout_text(timeout))))?
}

/// Run the extraction path(s) selected by `method`.
///
/// `BOTH` concatenates HTML text and OCR text, HTML first.
async fn extract_text(
    extractor: &mut dyn Extractor,
    payload: &FetchedPayload,
    method: ExtractionMethod,
) -> Result<String> {
    match method {
        ExtractionMethod::Html => extractor.extract(payload, ExtractionSource::Html).await,
        ExtractionMethod::Ocr => extractor.extract(payload, ExtractionSource::Ocr).await,
        ExtractionMethod::Both => {
            let html = extractor.extract(payload, ExtractionSource::Html).await?;
            let ocr = extractor.extract(payload, ExtractionSource::Ocr).await?;
            Ok(merge_text(html, ocr))
        }
    }
}

fn merge_text(html: String, ocr: String) -> String {
    match (html.is_empty(), ocr.is_empty()) {
        (_, true) => html,
        (true, false) => ocr,
        (false, false) => format!("{html}\n{ocr}"),
    }
}

async fn classify(ctx: &TaskContext<'_>, domain: &Domain, text: &str) -> Result<Classification> {
    let timeout = ctx.settings.classify_timeout;
    let classification = tokio::time::timeout(timeout, ctx.classifier.classify(domain, text))
        .await
        .map_err(|_| {
            SitesortError::Classify(format!("timed out after {}", timeout_text(timeout)))
        })??;

    validate_classification(classification)
}

/// `30s` for whole seconds, `250ms` otherwise.
fn timeout_text(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 && timeout.as_secs() > 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

/// Enforce the confidence invariant on classifier output.
fn validate_classification(mut c: Classification) -> Result<Classification> {
    if !c.confidence.is_finite() || !(0.0..=1.0).contains(&c.confidence) {
        return Err(SitesortError::Classify(format!(
            "confidence {} outside [0, 1]",
            c.confidence
        )));
    }
    if c.label == ClassificationLabel::Error {
        c.confidence = 0.0;
    } else if c.confidence == 0.0 {
        return Err(SitesortError::Classify(format!(
            "label {} reported with zero confidence",
            c.label
        )));
    }
    Ok(c)
}

/// Synthesize the `Error` result for a failed stage and store it best-effort.
async fn fail(
    ctx: &TaskContext<'_>,
    domain: Domain,
    stage: TaskState,
    error: SitesortError,
) -> TaskOutcome {
    warn!(%domain, stage = ?stage, error = %error, "task failed");

    let result = ClassificationResult::error(
        domain,
        error.cause(),
        ctx.config.method,
        ctx.batch_id.clone(),
    );
    if let Err(e) = ctx.store.insert(&result).await {
        warn!(domain = %result.domain, error = %e, "failed to persist error result");
    }

    TaskOutcome {
        result,
        state: TaskState::Failed,
        failed_stage: Some(stage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MemoryStore, MockClassifier, MockExtractor, MockFetcher, classification,
    };

    fn settings() -> PipelineSettings {
        PipelineSettings {
            fetch_timeout: Duration::from_millis(200),
            anti_detection_fetch_timeout: Duration::from_millis(300),
            extract_timeout: Duration::from_millis(200),
            classify_timeout: Duration::from_millis(200),
            event_buffer: 16,
        }
    }

    struct Harness {
        fetcher: MockFetcher,
        classifier: MockClassifier,
        store: MemoryStore,
        config: ProcessingConfig,
        settings: PipelineSettings,
        batch_id: BatchId,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                fetcher: MockFetcher::default(),
                classifier: MockClassifier::default(),
                store: MemoryStore::default(),
                config: ProcessingConfig::default(),
                settings: settings(),
                batch_id: BatchId::new(),
            }
        }

        fn ctx(&self) -> TaskContext<'_> {
            TaskContext {
                fetcher: &self.fetcher,
                classifier: &self.classifier,
                store: &self.store,
                config: &self.config,
                settings: &self.settings,
                batch_id: &self.batch_id,
            }
        }

        async fn run(&self, domain: &str) -> TaskOutcome {
            self.run_with(MockExtractor::default(), domain).await
        }

        async fn run_with(&self, mut extractor: MockExtractor, domain: &str) -> TaskOutcome {
            run_task(self.ctx(), &mut extractor, Domain::new(domain)).await
        }
    }

    #[tokio::test]
    async fn successful_task_persists_and_reports() {
        let h = Harness::new();
        let outcome = h.run("acme.com").await;

        assert_eq!(outcome.state, TaskState::Done);
        assert_eq!(outcome.outcome(), Outcome::Succeeded);
        assert_eq!(outcome.result.classification_label, ClassificationLabel::Marketing);
        assert_eq!(outcome.result.batch_id, h.batch_id);
        assert_eq!(h.store.rows().len(), 1);
    }

    #[tokio::test]
    async fn fetch_timeout_yields_error_result() {
        let mut h = Harness::new();
        h.fetcher = MockFetcher::default().hang_on("unreachable.test");
        let outcome = h.run("unreachable.test").await;

        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.failed_stage, Some(TaskState::Fetching));
        assert!(outcome.result.is_error());
        assert_eq!(outcome.result.confidence_level, 0.0);
        assert_eq!(outcome.result.summary, "unreachable.test: timed out after 200ms");
        assert_eq!(h.classifier.calls(), 0);
        // Error rows are stored so they show up in reports.
        assert_eq!(h.store.rows().len(), 1);
    }

    #[tokio::test]
    async fn extract_failure_stops_before_classify() {
        let mut h = Harness::new();
        h.config.method = ExtractionMethod::Ocr;
        h.fetcher = MockFetcher::default().without_screenshot();
        let outcome = h.run("acme.com").await;

        assert_eq!(outcome.failed_stage, Some(TaskState::Extracting));
        assert_eq!(h.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn stalled_extraction_times_out() {
        let h = Harness::new();
        let outcome = h.run_with(MockExtractor::stalled(), "acme.com").await;

        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.failed_stage, Some(TaskState::Extracting));
        assert_eq!(outcome.result.summary, "timed out after 200ms");
        assert_eq!(h.classifier.calls(), 0);
        assert_eq!(h.store.rows().len(), 1);
    }

    #[tokio::test]
    async fn classifier_error_label_counts_as_failure() {
        let mut h = Harness::new();
        h.classifier = MockClassifier::returning(classification(ClassificationLabel::Error, 0.95));
        let outcome = h.run("parked.com").await;

        assert_eq!(outcome.state, TaskState::Done);
        assert_eq!(outcome.result.confidence_level, 0.0);
        assert_eq!(outcome.outcome(), Outcome::Failed);
    }

    #[tokio::test]
    async fn invalid_confidence_fails_classification() {
        for confidence in [1.5, -0.1, f64::NAN, 0.0] {
            let mut h = Harness::new();
            h.classifier =
                MockClassifier::returning(classification(ClassificationLabel::Portal, confidence));
            let outcome = h.run("acme.com").await;
            assert_eq!(outcome.failed_stage, Some(TaskState::Classifying), "{confidence}");
            assert!(outcome.result.is_error());
        }
    }

    #[tokio::test]
    async fn persist_failure_reports_result_but_fails() {
        let mut h = Harness::new();
        h.store = MemoryStore::default().failing_writes();
        let outcome = h.run("acme.com").await;

        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.failed_stage, Some(TaskState::Persisting));
        assert_eq!(outcome.result.classification_label, ClassificationLabel::Marketing);
        assert_eq!(outcome.outcome(), Outcome::Failed);
    }

    #[tokio::test]
    async fn both_method_feeds_html_then_ocr() {
        let mut h = Harness::new();
        h.config.method = ExtractionMethod::Both;
        let outcome = h.run("acme.com").await;

        assert_eq!(outcome.state, TaskState::Done);
        assert_eq!(
            h.classifier.inputs(),
            vec!["html text of acme.com\nocr text of acme.com".to_string()]
        );
    }

    #[test]
    fn merge_skips_empty_sides() {
        assert_eq!(merge_text("a".into(), "".into()), "a");
        assert_eq!(merge_text("".into(), "b".into()), "b");
        assert_eq!(merge_text("a".into(), "b".into()), "a\nb");
    }

    #[test]
    fn timeouts_render_in_readable_units() {
        assert_eq!(timeout_text(Duration::from_secs(30)), "30s");
        assert_eq!(timeout_text(Duration::from_millis(1500)), "1500ms");
        assert_eq!(timeout_text(Duration::from_millis(250)), "250ms");
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Classifying.is_terminal());
    }
}
