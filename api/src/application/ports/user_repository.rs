use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub highlight_color: String,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<UserProfile>>;
    /// Looks up many users at once; ids without a row are absent from the result.
    async fn find_profiles(&self, ids: &[String]) -> anyhow::Result<HashMap<String, UserProfile>>;
}
