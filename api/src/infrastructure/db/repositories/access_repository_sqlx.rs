use async_trait::async_trait;

use crate::application::ports::access_repository::AccessRepository;
use crate::infrastructure::db::PgPool;

pub struct SqlxAccessRepository {
    pub pool: PgPool,
}

impl SqlxAccessRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessRepository for SqlxAccessRepository {
    async fn can_edit(&self, doc_id: &str, user_id: &str) -> anyhow::Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM document_access WHERE document_id = $1 AND user_id = $2",
        )
        .bind(doc_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}
