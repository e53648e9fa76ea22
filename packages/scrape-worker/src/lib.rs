// Scrape worker - API core
//
// Queue-driven content ingestion: URL tasks arrive on a JetStream work queue,
// each page is fetched, turned into an article record and upserted into
// Postgres. Many worker processes share one durable consumer.

pub mod common;
pub mod config;
pub mod error;
pub mod kernel;
pub mod pipeline;
pub mod worker;

pub use config::*;
