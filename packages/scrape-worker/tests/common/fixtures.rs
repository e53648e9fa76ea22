//! Test data builders.

use bytes::Bytes;
use scrape_worker_core::common::{ArticleFields, ArticleRecord};
use uuid::Uuid;

/// A url no other test uses, since the database is shared.
pub fn unique_url(path: &str) -> String {
    format!("https://news.example.com/{}/{}", Uuid::new_v4(), path)
}

pub fn article_record(url: &str, title: &str) -> ArticleRecord {
    ArticleRecord::new(
        url,
        Bytes::from(format!("<html><title>{}</title></html>", title)),
        ArticleFields {
            title: Some(title.to_string()),
            language_code: Some("en".to_string()),
            description: Some("A short description".to_string()),
            authors: vec!["Jane Doe".to_string(), "John Roe".to_string()],
            body_text: Some("The council met on Tuesday.".to_string()),
            keywords: vec!["council".to_string(), "tuesday".to_string()],
            summary: Some("The council met.".to_string()),
            ..Default::default()
        },
    )
}
