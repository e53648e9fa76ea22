//! Kernel module - worker infrastructure behind injectable traits.

pub mod article_store;
pub mod fetch_client;
pub mod html_extractor;
pub mod nats;
pub mod nlp;
pub mod resources;
pub mod test_dependencies;
pub mod traits;

pub use article_store::{PostgresArticleStore, StoredArticle};
pub use fetch_client::HttpFetchClient;
pub use html_extractor::HtmlExtractor;
pub use nats::{JetStreamDelivery, NatsClientPublisher, NatsPublisher, PublishedMessage, TestNats};
pub use resources::WorkerResources;
pub use traits::*;
