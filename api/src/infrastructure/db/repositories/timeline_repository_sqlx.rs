use async_trait::async_trait;
use uuid::Uuid;

use crate::application::ports::event_log_port::{EventLogPort, TimelineEvent};
use crate::infrastructure::db::PgPool;

pub struct SqlxTimelineRepository {
    pub pool: PgPool,
}

impl SqlxTimelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLogPort for SqlxTimelineRepository {
    async fn record(&self, event: TimelineEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO timeline_events (id, document_id, user_id, author_id, kind, payload)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.doc_id)
        .bind(&event.user_id)
        .bind(&event.author_id)
        .bind(&event.kind)
        .bind(sqlx::types::Json(&event.payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
