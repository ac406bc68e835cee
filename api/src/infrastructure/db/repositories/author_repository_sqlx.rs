use anyhow::bail;
use async_trait::async_trait;

use crate::application::ports::author_repository::AuthorRepository;
use crate::infrastructure::db::PgPool;

const MINT_ATTEMPTS: usize = 5;

/// Author ids are small per-document integers, exposed to clients in hex.
pub struct SqlxAuthorRepository {
    pub pool: PgPool,
}

impl SqlxAuthorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorRepository for SqlxAuthorRepository {
    async fn validate_author_id(
        &self,
        author_id: &str,
        doc_id: &str,
        user_id: &str,
    ) -> anyhow::Result<bool> {
        let Ok(author) = i64::from_str_radix(author_id, 16) else {
            return Ok(false);
        };
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(1) FROM author_ids
               WHERE document_id = $1 AND user_id = $2 AND author_id = $3"#,
        )
        .bind(doc_id)
        .bind(user_id)
        .bind(author)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn new_author_id(&self, doc_id: &str, user_id: &str) -> anyhow::Result<String> {
        for attempt in 0..MINT_ATTEMPTS {
            let minted = sqlx::query_scalar::<_, i64>(
                r#"INSERT INTO author_ids (document_id, user_id, author_id)
                   SELECT $1, $2, COALESCE(MAX(author_id), 0) + 1
                   FROM author_ids WHERE document_id = $1
                   ON CONFLICT (document_id, author_id) DO NOTHING
                   RETURNING author_id"#,
            )
            .bind(doc_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            match minted {
                Some(author) => return Ok(format!("{author:x}")),
                None => {
                    tracing::debug!(document_id = doc_id, attempt, "author_id_conflict_retry")
                }
            }
        }
        bail!("could not allocate author id for document {doc_id}")
    }
}
