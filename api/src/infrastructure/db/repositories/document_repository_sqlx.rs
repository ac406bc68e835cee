use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::application::ports::document_repository::{DocumentRecord, DocumentRepository};
use crate::infrastructure::db::PgPool;

pub struct SqlxDocumentRepository {
    pub pool: PgPool,
}

impl SqlxDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for SqlxDocumentRepository {
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<DocumentRecord>> {
        let row = sqlx::query(r#"SELECT id, title, updated_at FROM documents WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| DocumentRecord {
            id: r.get("id"),
            title: r.get("title"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn touch_updated_at(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE documents SET updated_at = $2 WHERE id = $1"#)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
