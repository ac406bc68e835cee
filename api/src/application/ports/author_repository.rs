use async_trait::async_trait;

/// Per-(document, user) author identifiers used to attribute edits.
#[async_trait]
pub trait AuthorRepository: Send + Sync {
    /// True when `author_id` was previously issued to `user_id` for `doc_id`.
    async fn validate_author_id(
        &self,
        author_id: &str,
        doc_id: &str,
        user_id: &str,
    ) -> anyhow::Result<bool>;

    /// Issues a fresh author identifier, unique within the document.
    async fn new_author_id(&self, doc_id: &str, user_id: &str) -> anyhow::Result<String>;
}
