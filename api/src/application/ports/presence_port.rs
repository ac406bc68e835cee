use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub type PresenceStream = BoxStream<'static, anyhow::Result<String>>;

/// Shared cache and pub/sub channel backing presence and op fan-out.
#[async_trait]
pub trait PresencePort: Send + Sync {
    async fn publish(&self, doc_id: &str, payload: &str) -> anyhow::Result<()>;
    async fn subscribe(&self, doc_id: &str) -> anyhow::Result<PresenceStream>;

    async fn add_connection(&self, doc_id: &str, member: &str) -> anyhow::Result<()>;
    async fn remove_connection(&self, doc_id: &str, member: &str) -> anyhow::Result<()>;
    async fn connections(&self, doc_id: &str) -> anyhow::Result<Vec<String>>;

    async fn set_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        payload: &str,
        ttl: Duration,
    ) -> anyhow::Result<()>;
    async fn extend_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        ttl: Duration,
    ) -> anyhow::Result<()>;
    async fn get_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
    ) -> anyhow::Result<Option<String>>;
    async fn remove_cursor(&self, doc_id: &str, user_id: &str, author_id: &str)
    -> anyhow::Result<()>;

    /// Stores the cursor entry and publishes it; backends that can pipeline both should.
    async fn store_and_publish_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        payload: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.set_cursor(doc_id, user_id, author_id, payload, ttl)
            .await?;
        self.publish(doc_id, payload).await
    }

    async fn mark_last_message(
        &self,
        doc_id: &str,
        user_id: &str,
        at_unix: i64,
        ttl: Duration,
    ) -> anyhow::Result<()>;
    async fn last_message(&self, doc_id: &str, user_id: &str) -> anyhow::Result<Option<i64>>;
}
