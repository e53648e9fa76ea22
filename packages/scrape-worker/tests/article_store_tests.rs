//! Integration tests for the Postgres article store.
//!
//! Persistence is keyed by url: redelivering an already persisted task must
//! update the one row and hand back the same id.

mod common;

use crate::common::{article_record, unique_url, TestHarness};
use scrape_worker_core::error::{FailureClass, PersistError};
use scrape_worker_core::kernel::BaseArticleStore;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn persist_stores_all_fields(ctx: &TestHarness) {
    let store = ctx.store();
    let url = unique_url("council-meeting");

    let id = store
        .persist(&article_record(&url, "Council meets"))
        .await
        .unwrap();

    let stored = store.find_by_url(&url).await.unwrap().unwrap();
    assert_eq!(stored.id, id);
    assert_eq!(stored.title.as_deref(), Some("Council meets"));
    assert_eq!(stored.language_code.as_deref(), Some("en"));
    assert_eq!(stored.authors.as_deref(), Some("Jane Doe; John Roe"));
    assert_eq!(stored.keywords.as_deref(), Some("council, tuesday"));
    assert_eq!(stored.top_image_url, None);
    assert_eq!(
        stored.raw_content,
        b"<html><title>Council meets</title></html>".to_vec()
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn persisting_same_url_twice_is_idempotent(ctx: &TestHarness) {
    let store = ctx.store();
    let url = unique_url("redelivered");

    let first = store.persist(&article_record(&url, "First")).await.unwrap();
    let second = store.persist(&article_record(&url, "Second")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.count_by_url(&url).await.unwrap(), 1);

    let stored = store.find_by_url(&url).await.unwrap().unwrap();
    assert_eq!(stored.title.as_deref(), Some("Second"));
    assert!(stored.updated_at >= stored.created_at);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_persists_of_same_url_yield_one_row(ctx: &TestHarness) {
    let store = ctx.store();
    let url = unique_url("raced");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let record = article_record(&url, &format!("Attempt {}", i));
            tokio::spawn(async move { store.persist(&record).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.count_by_url(&url).await.unwrap(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn different_urls_get_different_rows(ctx: &TestHarness) {
    let store = ctx.store();
    let a = unique_url("a");
    let b = unique_url("b");

    let id_a = store.persist(&article_record(&a, "A")).await.unwrap();
    let id_b = store.persist(&article_record(&b, "B")).await.unwrap();

    assert_ne!(id_a, id_b);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn check_violation_is_permanent(ctx: &TestHarness) {
    let store = ctx.store();

    let err = store
        .persist(&article_record("   ", "Blank url"))
        .await
        .unwrap_err();

    assert!(matches!(err, PersistError::Constraint(_)));
    assert_eq!(err.class(), FailureClass::Permanent);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn closed_pool_is_transient(ctx: &TestHarness) {
    let store = ctx.store();
    ctx.db_pool.close().await;

    let err = store
        .persist(&article_record(&unique_url("late"), "Too late"))
        .await
        .unwrap_err();

    assert_eq!(err.class(), FailureClass::Transient);
}
