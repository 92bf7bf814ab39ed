//! Hand-written collaborators for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use sitesort_classifier::{Classification, Classifier};
use sitesort_extract::{ExtractionSource, Extractor, ExtractorFactory};
use sitesort_fetcher::{FetchOptions, FetchedPayload, Fetcher};
use sitesort_shared::{
    BatchId, BatchRecord, ClassificationLabel, ClassificationResult, Domain, Result,
    SitesortError,
};

use crate::scheduler::OutcomeSink;
use crate::store::ResultStore;
use crate::task::TaskOutcome;

pub fn classification(label: ClassificationLabel, confidence: f64) -> Classification {
    Classification {
        label,
        confidence,
        summary: format!("{label} site"),
        snippet: "Welcome".into(),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<ClassificationResult>>,
    batches: Mutex<HashMap<BatchId, BatchRecord>>,
    fail_reads: bool,
    fail_writes: bool,
    fail_batches: bool,
}

impl MemoryStore {
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn failing_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    pub fn seed(&self, result: ClassificationResult) {
        self.rows.lock().unwrap().push(result);
    }

    pub fn rows(&self) -> Vec<ClassificationResult> {
        self.rows.lock().unwrap().clone()
    }

    pub fn batch(&self, id: &BatchId) -> Option<BatchRecord> {
        self.batches.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn get_existing(&self, domain: &Domain) -> Result<Option<ClassificationResult>> {
        if self.fail_reads {
            return Err(SitesortError::Storage("database is locked".into()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| &r.domain == domain && !r.is_error())
            .cloned())
    }

    async fn insert(&self, result: &ClassificationResult) -> Result<()> {
        if self.fail_writes {
            return Err(SitesortError::Storage("disk full".into()));
        }
        self.rows.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn create_batch(&self, batch: &BatchRecord) -> Result<()> {
        if self.fail_batches {
            return Err(SitesortError::Storage("read-only database".into()));
        }
        self.batches
            .lock()
            .unwrap()
            .insert(batch.batch_id.clone(), batch.clone());
        Ok(())
    }

    async fn complete_batch(&self, batch: &BatchRecord) -> Result<()> {
        let mut batches = self.batches.lock().unwrap();
        match batches.get_mut(&batch.batch_id) {
            Some(row) => {
                *row = batch.clone();
                Ok(())
            }
            None => Err(SitesortError::Storage(format!(
                "batch {} not found",
                batch.batch_id
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Serves `html text of <domain>` as HTML and `ocr text of <domain>` as the
/// screenshot bytes.
#[derive(Default)]
pub struct MockFetcher {
    delay: Duration,
    hang: HashSet<String>,
    fail: HashSet<String>,
    no_screenshot: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn hang_on(mut self, domain: &str) -> Self {
        self.hang.insert(domain.to_string());
        self
    }

    pub fn failing_on(mut self, domain: &str) -> Self {
        self.fail.insert(domain.to_string());
        self
    }

    pub fn without_screenshot(mut self) -> Self {
        self.no_screenshot = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, domain: &Domain, options: &FetchOptions) -> Result<FetchedPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let name = domain.as_str();
        if self.hang.contains(name) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(name) {
            return Err(SitesortError::Fetch(format!("{name}: HTTP 503")));
        }
        Ok(FetchedPayload {
            html: Some(format!("html text of {name}")),
            screenshot: (options.screenshot && !self.no_screenshot)
                .then(|| format!("ocr text of {name}").into_bytes()),
        })
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockExtractor {
    stalled: bool,
}

impl MockExtractor {
    /// Never finish, like a hung OCR process.
    pub fn stalled() -> Self {
        Self { stalled: true }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &mut self,
        payload: &FetchedPayload,
        source: ExtractionSource,
    ) -> Result<String> {
        if self.stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        match source {
            ExtractionSource::Html => payload
                .html
                .clone()
                .ok_or_else(|| SitesortError::Extract("no HTML content fetched".into())),
            ExtractionSource::Ocr => payload
                .screenshot
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .ok_or_else(|| SitesortError::Extract("no screenshot captured".into())),
        }
    }
}

#[derive(Default)]
pub struct MockExtractorFactory {
    created: AtomicUsize,
}

impl MockExtractorFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ExtractorFactory for MockExtractorFactory {
    fn create(&self, _worker_id: usize) -> Result<Box<dyn Extractor>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockExtractor::default()))
    }
}

pub struct FailingExtractorFactory;

impl ExtractorFactory for FailingExtractorFactory {
    fn create(&self, _worker_id: usize) -> Result<Box<dyn Extractor>> {
        Err(SitesortError::Extract("ocr engine unavailable".into()))
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Answers `Marketing` at 0.9 unless configured otherwise.
pub struct MockClassifier {
    answer: Classification,
    per_domain: HashMap<String, Classification>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    delay: Duration,
    stalled: bool,
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::returning(classification(ClassificationLabel::Marketing, 0.9))
    }
}

impl MockClassifier {
    pub fn returning(answer: Classification) -> Self {
        Self {
            answer,
            per_domain: HashMap::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            stalled: false,
        }
    }

    pub fn with_answer_for(mut self, domain: &str, answer: Classification) -> Self {
        self.per_domain.insert(domain.to_string(), answer);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Never answer, so the classify timeout fires.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, domain: &Domain, text: &str) -> Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(text.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self
            .per_domain
            .get(domain.as_str())
            .unwrap_or(&self.answer)
            .clone())
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CollectingSink {
    outcomes: Mutex<Vec<TaskOutcome>>,
}

impl CollectingSink {
    pub fn outcomes(&self) -> Vec<TaskOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeSink for CollectingSink {
    async fn finished(&self, outcome: TaskOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}
