use async_trait::async_trait;

#[async_trait]
pub trait AccessRepository: Send + Sync {
    async fn can_edit(&self, doc_id: &str, user_id: &str) -> anyhow::Result<bool>;
}
