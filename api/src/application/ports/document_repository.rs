use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<DocumentRecord>>;
    async fn touch_updated_at(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
}
