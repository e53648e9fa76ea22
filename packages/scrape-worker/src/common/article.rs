//! Article data produced by extraction and handed to persistence.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Fields pulled out of a document. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFields {
    pub title: Option<String>,
    pub language_code: Option<String>,
    pub description: Option<String>,
    pub top_image_url: Option<String>,
    pub authors: Vec<String>,
    pub body_text: Option<String>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
}

/// A successfully extracted article, ready to be persisted.
#[derive(Debug, Clone)]
pub struct ArticleRecord {
    pub url: String,
    pub raw_content: Bytes,
    pub fields: ArticleFields,
}

impl ArticleRecord {
    pub fn new(url: impl Into<String>, raw_content: Bytes, fields: ArticleFields) -> Self {
        Self {
            url: url.into(),
            raw_content,
            fields,
        }
    }

    /// Authors flattened for the `authors` column ("A; B").
    pub fn authors_display(&self) -> Option<String> {
        join_non_empty(&self.fields.authors, "; ")
    }

    /// Keywords flattened for the `keywords` column ("a, b").
    pub fn keywords_display(&self) -> Option<String> {
        join_non_empty(&self.fields.keywords, ", ")
    }
}

fn join_non_empty(items: &[String], separator: &str) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(separator))
    }
}
