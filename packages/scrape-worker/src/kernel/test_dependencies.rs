// TestDependencies - mock implementations for testing
//
// Recording fakes for every kernel seam, so the processor, dispatcher and
// lifecycle can be exercised without a broker, a database or the network.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::fetch_client::validate_url;
use super::{BaseArticleStore, BaseExtractor, BaseFetchClient, BaseResources, Delivery, RawContent};
use crate::common::{ArticleFields, ArticleRecord, TaskPayload};
use crate::error::{DeliveryError, ExtractionError, FailureClass, FetchError, PersistError};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Journal
// =============================================================================

/// Ordered log shared between fakes, for asserting cross-component ordering.
#[derive(Clone, Default)]
pub struct TestJournal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl TestJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|e| e == entry)
    }
}

// =============================================================================
// Concurrency span
// =============================================================================

/// Tracks how many callers are inside a section at once.
///
/// Shared between [`MockFetchClient::with_task_span`] and
/// [`InMemoryArticleStore::with_task_span`] it measures whole tasks: entered
/// when a fetch starts, left when the persist for that task completes.
#[derive(Default)]
pub struct ConcurrencySpan {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencySpan {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Mock Fetch Client
// =============================================================================

/// Scripted result of a mock fetch.
#[derive(Debug, Clone)]
pub enum MockFetch {
    Body(Bytes),
    Timeout,
    Status(u16),
}

pub struct MockFetchClient {
    responses: Mutex<HashMap<String, MockFetch>>,
    default: MockFetch,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    fetches: ConcurrencySpan,
    task_span: Option<Arc<ConcurrencySpan>>,
}

impl MockFetchClient {
    /// Every URL returns `html` unless scripted otherwise.
    pub fn new(html: &str) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            default: MockFetch::Body(Bytes::from(html.to_string())),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            fetches: ConcurrencySpan::default(),
            task_span: None,
        }
    }

    pub fn with_response(self, url: &str, response: MockFetch) -> Self {
        lock(&self.responses).insert(url.to_string(), response);
        self
    }

    /// Simulate network latency on every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Enter `span` at the start of every fetch.
    pub fn with_task_span(mut self, span: Arc<ConcurrencySpan>) -> Self {
        self.task_span = Some(span);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn was_fetched(&self, url: &str) -> bool {
        lock(&self.calls).iter().any(|u| u == url)
    }

    /// Highest number of fetches observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.fetches.max()
    }
}

#[async_trait]
impl BaseFetchClient for MockFetchClient {
    async fn fetch(&self, raw_url: &str) -> Result<RawContent, FetchError> {
        lock(&self.calls).push(raw_url.to_string());
        let url = validate_url(raw_url)?;
        if let Some(span) = &self.task_span {
            span.enter();
        }

        self.fetches.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.fetches.exit();

        let response = lock(&self.responses)
            .get(raw_url)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match response {
            MockFetch::Body(body) => Ok(RawContent { url, body }),
            MockFetch::Timeout => Err(FetchError::Timeout {
                url: raw_url.to_string(),
            }),
            MockFetch::Status(status) => Err(FetchError::Status {
                url: raw_url.to_string(),
                status,
            }),
        }
    }
}

// =============================================================================
// Mock Extractor
// =============================================================================

#[derive(Debug, Clone)]
pub enum MockExtraction {
    Fields(ArticleFields),
    Empty,
    NotAnArticle,
    Panic,
}

pub struct MockExtractor {
    result: MockExtraction,
    calls: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new(result: MockExtraction) -> Self {
        Self {
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns a title and body for every document.
    pub fn article(title: &str, body: &str) -> Self {
        Self::new(MockExtraction::Fields(ArticleFields {
            title: Some(title.to_string()),
            body_text: Some(body.to_string()),
            ..Default::default()
        }))
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl BaseExtractor for MockExtractor {
    fn extract(&self, _raw: &[u8], url: &Url) -> Result<ArticleFields, ExtractionError> {
        lock(&self.calls).push(url.to_string());
        match &self.result {
            MockExtraction::Fields(fields) => Ok(fields.clone()),
            MockExtraction::Empty => Err(ExtractionError::Empty),
            MockExtraction::NotAnArticle => Err(ExtractionError::NotAnArticle),
            MockExtraction::Panic => panic!("extractor blew up on {}", url),
        }
    }
}

// =============================================================================
// In-memory Article Store
// =============================================================================

/// Url-keyed store with the same idempotency contract as Postgres.
#[derive(Default)]
pub struct InMemoryArticleStore {
    rows: Mutex<HashMap<String, (Uuid, ArticleRecord)>>,
    failures: Mutex<VecDeque<FailureClass>>,
    delay: Duration,
    persist_calls: AtomicUsize,
    task_span: Option<Arc<ConcurrencySpan>>,
}

impl InMemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Leave `span` when every persist completes.
    pub fn with_task_span(mut self, span: Arc<ConcurrencySpan>) -> Self {
        self.task_span = Some(span);
        self
    }

    /// Make the next persist calls fail with the given classes, in order.
    pub fn fail_next(&self, class: FailureClass) {
        lock(&self.failures).push_back(class);
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, url: &str) -> Option<(Uuid, ArticleRecord)> {
        lock(&self.rows).get(url).cloned()
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseArticleStore for InMemoryArticleStore {
    async fn persist(&self, record: &ArticleRecord) -> Result<Uuid, PersistError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(span) = &self.task_span {
            span.exit();
        }

        let failure = lock(&self.failures).pop_front();
        match failure {
            Some(FailureClass::Transient) => {
                return Err(PersistError::Transient(sqlx::Error::PoolTimedOut))
            }
            Some(FailureClass::Permanent) => {
                return Err(PersistError::Other("value too long for column".into()))
            }
            None => {}
        }

        let mut rows = lock(&self.rows);
        let id = rows
            .get(&record.url)
            .map(|(id, _)| *id)
            .unwrap_or_else(Uuid::now_v7);
        rows.insert(record.url.clone(), (id, record.clone()));
        Ok(id)
    }
}

// =============================================================================
// Test Delivery
// =============================================================================

/// Terminal state recorded by a [`TestDelivery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked,
    Termed,
}

struct TestDeliveryInner {
    payload: Bytes,
    subject: String,
    settlements: Mutex<Vec<Settlement>>,
    progress: AtomicUsize,
    journal: Option<TestJournal>,
    fail_settle: bool,
}

/// In-memory delivery. Clones share state, so a test can keep a handle
/// while the dispatcher owns the delivery.
#[derive(Clone)]
pub struct TestDelivery {
    inner: Arc<TestDeliveryInner>,
}

impl TestDelivery {
    pub fn raw(payload: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(TestDeliveryInner {
                payload: payload.into(),
                subject: "urls".to_string(),
                settlements: Mutex::new(Vec::new()),
                progress: AtomicUsize::new(0),
                journal: None,
                fail_settle: false,
            }),
        }
    }

    /// A well-formed `{"url": ...}` task payload.
    pub fn for_url(url: &str) -> Self {
        let payload = serde_json::to_vec(&TaskPayload::new(url)).unwrap_or_default();
        Self::raw(payload)
    }

    /// Record settlements into a shared journal as `"<action> <payload>"`.
    pub fn with_journal(self, journal: TestJournal) -> Self {
        self.rebuild(Some(journal), self.inner.fail_settle)
    }

    /// Every ack/nak/term call returns an error (after recording it).
    pub fn failing_settle(self) -> Self {
        self.rebuild(self.inner.journal.clone(), true)
    }

    fn rebuild(&self, journal: Option<TestJournal>, fail_settle: bool) -> Self {
        Self {
            inner: Arc::new(TestDeliveryInner {
                payload: self.inner.payload.clone(),
                subject: self.inner.subject.clone(),
                settlements: Mutex::new(Vec::new()),
                progress: AtomicUsize::new(0),
                journal,
                fail_settle,
            }),
        }
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        lock(&self.inner.settlements).clone()
    }

    /// Number of in-progress signals sent before settling.
    pub fn progress_count(&self) -> usize {
        self.inner.progress.load(Ordering::SeqCst)
    }

    /// The single terminal state, if exactly one was reached.
    pub fn settlement(&self) -> Option<Settlement> {
        match self.settlements().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    fn settle(&self, settlement: Settlement, action: &'static str) -> Result<(), DeliveryError> {
        lock(&self.inner.settlements).push(settlement);
        if let Some(journal) = &self.inner.journal {
            journal.record(format!(
                "{} {}",
                action,
                String::from_utf8_lossy(&self.inner.payload)
            ));
        }
        if self.inner.fail_settle {
            return Err(DeliveryError {
                action,
                source: "broker connection closed".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for TestDelivery {
    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    fn subject(&self) -> &str {
        &self.inner.subject
    }

    async fn ack(&self) -> Result<(), DeliveryError> {
        self.settle(Settlement::Acked, "ack")
    }

    async fn nack(&self) -> Result<(), DeliveryError> {
        self.settle(Settlement::Nacked, "nak")
    }

    async fn term(&self) -> Result<(), DeliveryError> {
        self.settle(Settlement::Termed, "term")
    }

    async fn in_progress(&self) -> Result<(), DeliveryError> {
        self.inner.progress.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Recording Resources
// =============================================================================

/// Records close calls into a journal.
pub struct RecordingResources {
    journal: TestJournal,
}

impl RecordingResources {
    pub fn new(journal: TestJournal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl BaseResources for RecordingResources {
    async fn close_store(&self) {
        self.journal.record("close store");
    }

    async fn close_transport(&self) {
        self.journal.record("close transport");
    }

    async fn close_broker(&self) {
        self.journal.record("close broker");
    }
}
