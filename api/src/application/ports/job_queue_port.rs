use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackgroundJob {
    Checkpoint {
        doc_id: String,
        #[serde(default)]
        attempt: u32,
    },
    SummarizeSession {
        doc_id: String,
        user_id: String,
        author_id: String,
        #[serde(default)]
        last_message_at: Option<i64>,
    },
}

impl BackgroundJob {
    pub fn doc_id(&self) -> &str {
        match self {
            BackgroundJob::Checkpoint { doc_id, .. } => doc_id,
            BackgroundJob::SummarizeSession { doc_id, .. } => doc_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub entry_id: String,
    pub job: BackgroundJob,
}

#[async_trait]
pub trait JobQueuePort: Send + Sync {
    async fn enqueue(&self, job: &BackgroundJob) -> anyhow::Result<String>;
    async fn subscribe(&self) -> anyhow::Result<BoxStream<'static, anyhow::Result<QueuedJob>>>;
    async fn ack(&self, entry_id: &str) -> anyhow::Result<()>;
}
