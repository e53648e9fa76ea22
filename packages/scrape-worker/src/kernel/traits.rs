// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only. The per-task orchestration lives in
// pipeline::processor and only talks to these seams, so every one of them
// can be swapped for a fake in tests.
//
// Naming convention: Base* for trait names (e.g., BaseFetchClient, BaseArticleStore)

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;
use uuid::Uuid;

use crate::common::{ArticleFields, ArticleRecord};
use crate::error::{DeliveryError, ExtractionError, FetchError, PersistError};

// =============================================================================
// Fetch Trait (Infrastructure - HTTP transport)
// =============================================================================

/// Raw bytes retrieved for a URL.
#[derive(Debug, Clone)]
pub struct RawContent {
    /// The validated request URL (used to resolve relative links).
    pub url: Url,
    pub body: Bytes,
}

#[async_trait]
pub trait BaseFetchClient: Send + Sync {
    /// Fetch the document at `url`. Never retries.
    async fn fetch(&self, url: &str) -> Result<RawContent, FetchError>;
}

// =============================================================================
// Extraction Trait (Infrastructure - markup to article fields)
// =============================================================================

/// Pure, CPU-bound extraction. Callers must run it off the async executor.
pub trait BaseExtractor: Send + Sync {
    fn extract(&self, raw: &[u8], url: &Url) -> Result<ArticleFields, ExtractionError>;
}

// =============================================================================
// Article Store Trait (Infrastructure - durable persistence)
// =============================================================================

#[async_trait]
pub trait BaseArticleStore: Send + Sync {
    /// Insert or update the article keyed by its url, returning its id.
    ///
    /// Persisting the same url twice yields one row and the same id.
    async fn persist(&self, record: &ArticleRecord) -> Result<Uuid, PersistError>;
}

// =============================================================================
// Delivery Trait (Infrastructure - broker acknowledgement)
// =============================================================================

/// One message handed to this worker by the broker.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn payload(&self) -> &[u8];

    fn subject(&self) -> &str;

    /// Handled; remove from the broker.
    async fn ack(&self) -> Result<(), DeliveryError>;

    /// Not handled; let the broker hand it to any worker in the group again.
    async fn nack(&self) -> Result<(), DeliveryError>;

    /// Never redeliver.
    async fn term(&self) -> Result<(), DeliveryError>;

    /// Still working; push back the broker's redelivery deadline.
    async fn in_progress(&self) -> Result<(), DeliveryError>;
}

// =============================================================================
// Resources Trait (Infrastructure - shutdown)
// =============================================================================

/// Long-lived connections closed by the lifecycle controller.
#[async_trait]
pub trait BaseResources: Send + Sync {
    async fn close_store(&self);

    async fn close_transport(&self);

    async fn close_broker(&self);
}
