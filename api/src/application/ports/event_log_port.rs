use async_trait::async_trait;
use serde_json::Value;

/// Structured client telemetry, e.g. paste provenance.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub doc_id: String,
    pub user_id: String,
    pub author_id: Option<String>,
    pub kind: String,
    pub payload: Value,
}

#[async_trait]
pub trait EventLogPort: Send + Sync {
    async fn record(&self, event: TimelineEvent) -> anyhow::Result<()>;
}
