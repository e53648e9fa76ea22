//! Per-task pipeline: fetch, extract, persist.
//!
//! `process` never panics and never touches the delivery. Every failure is
//! folded into an [`Outcome`] that the dispatcher turns into ack or nack.

use std::sync::Arc;
use tracing::debug;

use crate::common::{ArticleRecord, Outcome};
use crate::error::ExtractionError;
use crate::kernel::{BaseArticleStore, BaseExtractor, BaseFetchClient};

#[derive(Clone)]
pub struct TaskProcessor {
    fetcher: Arc<dyn BaseFetchClient>,
    extractor: Arc<dyn BaseExtractor>,
    store: Arc<dyn BaseArticleStore>,
}

impl TaskProcessor {
    pub fn new(
        fetcher: Arc<dyn BaseFetchClient>,
        extractor: Arc<dyn BaseExtractor>,
        store: Arc<dyn BaseArticleStore>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            store,
        }
    }

    /// Run one URL through the pipeline.
    pub async fn process(&self, url: &str) -> Outcome {
        let raw = match self.fetcher.fetch(url).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(url = %url, error = %e, "fetch failed");
                return Outcome::failure(e.class(), e.to_string());
            }
        };
        debug!(url = %url, bytes = raw.body.len(), "fetched");

        // Extraction is CPU bound; keep it off the async workers
        let extractor = Arc::clone(&self.extractor);
        let body = raw.body.clone();
        let page_url = raw.url.clone();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&body, &page_url))
            .await
            .unwrap_or_else(|join_err| Err(ExtractionError::Worker(join_err.to_string())));

        let fields = match extracted {
            Ok(fields) => fields,
            Err(e) => {
                debug!(url = %url, error = %e, "extraction failed");
                return Outcome::failure(e.class(), e.to_string());
            }
        };
        debug!(url = %url, title = ?fields.title, "extracted");

        let record = ArticleRecord::new(url, raw.body, fields);
        match self.store.persist(&record).await {
            Ok(id) => Outcome::Persisted { id },
            Err(e) => {
                debug!(url = %url, error = %e, "persist failed");
                Outcome::failure(e.class(), e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::error::FailureClass;
    use crate::kernel::test_dependencies::{
        InMemoryArticleStore, MockExtraction, MockExtractor, MockFetch, MockFetchClient,
    };
    use crate::kernel::HttpFetchClient;

    const PAGE: &str = "<html><head><title>T</title></head><body><p>Body</p></body></html>";

    fn processor(
        fetcher: MockFetchClient,
        extractor: MockExtractor,
    ) -> (TaskProcessor, Arc<MockExtractor>, Arc<InMemoryArticleStore>) {
        let extractor = Arc::new(extractor);
        let store = Arc::new(InMemoryArticleStore::new());
        let processor = TaskProcessor::new(Arc::new(fetcher), extractor.clone(), store.clone());
        (processor, extractor, store)
    }

    #[tokio::test]
    async fn test_success_persists_record() {
        let (processor, _, store) =
            processor(MockFetchClient::new(PAGE), MockExtractor::article("T", "Body"));

        let outcome = processor.process("https://example.com/a").await;

        let Outcome::Persisted { id } = outcome else {
            panic!("expected Persisted, got {:?}", outcome);
        };
        let (stored_id, record) = store.get("https://example.com/a").unwrap();
        assert_eq!(stored_id, id);
        assert_eq!(record.raw_content.as_ref(), PAGE.as_bytes());
        assert_eq!(record.fields.title.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_reprocessing_same_url_returns_same_id() {
        let (processor, _, store) =
            processor(MockFetchClient::new(PAGE), MockExtractor::article("T", "Body"));

        let first = processor.process("https://example.com/a").await;
        let second = processor.process("https://example.com/a").await;

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_transient() {
        let fetcher =
            MockFetchClient::new(PAGE).with_response("https://slow.example/", MockFetch::Timeout);
        let (processor, extractor, store) = processor(fetcher, MockExtractor::article("T", "B"));

        let outcome = processor.process("https://slow.example/").await;

        assert!(matches!(outcome, Outcome::TransientFailure { .. }));
        assert_eq!(extractor.call_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_permanent() {
        let fetcher = MockFetchClient::new(PAGE)
            .with_response("https://example.com/gone", MockFetch::Status(404));
        let (processor, _, _) = processor(fetcher, MockExtractor::article("T", "B"));

        let outcome = processor.process("https://example.com/gone").await;

        assert!(matches!(outcome, Outcome::PermanentFailure { .. }));
        assert!(outcome.reason().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_persist() {
        let (processor, _, store) = processor(
            MockFetchClient::new(PAGE),
            MockExtractor::new(MockExtraction::NotAnArticle),
        );

        let outcome = processor.process("https://example.com/a").await;

        assert!(matches!(outcome, Outcome::PermanentFailure { .. }));
        assert_eq!(store.persist_calls(), 0);
    }

    #[tokio::test]
    async fn test_extractor_panic_is_contained() {
        let (processor, _, store) = processor(
            MockFetchClient::new(PAGE),
            MockExtractor::new(MockExtraction::Panic),
        );

        let outcome = processor.process("https://example.com/a").await;

        assert!(matches!(outcome, Outcome::PermanentFailure { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_classes() {
        let (processor, _, store) =
            processor(MockFetchClient::new(PAGE), MockExtractor::article("T", "B"));

        store.fail_next(FailureClass::Transient);
        let outcome = processor.process("https://example.com/a").await;
        assert!(matches!(outcome, Outcome::TransientFailure { .. }));

        store.fail_next(FailureClass::Permanent);
        let outcome = processor.process("https://example.com/a").await;
        assert!(matches!(outcome, Outcome::PermanentFailure { .. }));

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_url_is_permanent_with_real_client() {
        let fetcher = Arc::new(HttpFetchClient::new(&FetchConfig::default()).unwrap());
        let extractor = Arc::new(MockExtractor::article("T", "B"));
        let store = Arc::new(InMemoryArticleStore::new());
        let processor = TaskProcessor::new(fetcher, extractor.clone(), store.clone());

        let outcome = processor.process("not-a-url").await;

        assert!(matches!(outcome, Outcome::PermanentFailure { .. }));
        assert_eq!(extractor.call_count(), 0);
        assert!(store.is_empty());
    }
}
