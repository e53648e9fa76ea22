//! Postgres persistence gateway for extracted articles.
//!
//! Articles are keyed by url: a redelivered task that was already persisted
//! updates the existing row and gets its id back instead of a duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::BaseArticleStore;
use crate::common::ArticleRecord;
use crate::error::PersistError;

/// A row of the `contents` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredArticle {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    pub raw_content: Vec<u8>,
    pub title: Option<String>,
    pub language_code: Option<String>,
    pub description: Option<String>,
    pub top_image_url: Option<String>,
    pub authors: Option<String>,
    pub body_text: Option<String>,
    pub keywords: Option<String>,
    pub summary: Option<String>,
}

#[derive(Clone)]
pub struct PostgresArticleStore {
    pool: PgPool,
}

impl PostgresArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find the stored article for a url
    pub async fn find_by_url(&self, url: &str) -> Result<Option<StoredArticle>, PersistError> {
        let article = sqlx::query_as::<_, StoredArticle>(
            r#"
            SELECT id, created_at, updated_at, url, raw_content, title, language_code,
                   description, top_image_url, authors, body_text, keywords, summary
            FROM contents
            WHERE url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(article)
    }

    /// Number of rows stored for a url (0 or 1 while the unique key holds)
    pub async fn count_by_url(&self, url: &str) -> Result<i64, PersistError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contents WHERE url = $1")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl BaseArticleStore for PostgresArticleStore {
    async fn persist(&self, record: &ArticleRecord) -> Result<Uuid, PersistError> {
        let fields = &record.fields;
        let mut tx = self.pool.begin().await?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO contents (
                id, url, raw_content, title, language_code, description,
                top_image_url, authors, body_text, keywords, summary
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (url) DO UPDATE SET
                raw_content = EXCLUDED.raw_content,
                title = EXCLUDED.title,
                language_code = EXCLUDED.language_code,
                description = EXCLUDED.description,
                top_image_url = EXCLUDED.top_image_url,
                authors = EXCLUDED.authors,
                body_text = EXCLUDED.body_text,
                keywords = EXCLUDED.keywords,
                summary = EXCLUDED.summary,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&record.url)
        .bind(record.raw_content.as_ref())
        .bind(&fields.title)
        .bind(&fields.language_code)
        .bind(&fields.description)
        .bind(&fields.top_image_url)
        .bind(record.authors_display())
        .bind(&fields.body_text)
        .bind(record.keywords_display())
        .bind(&fields.summary)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(url = %record.url, id = %id, "article persisted");
        Ok(id)
    }
}
