use async_trait::async_trait;

#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn put_object(&self, key: &str, content_type: &str, bytes: Vec<u8>)
    -> anyhow::Result<()>;
    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    /// Lexicographically smallest key under `prefix`.
    async fn list_first(&self, prefix: &str) -> anyhow::Result<Option<String>>;
    /// All keys under `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}
