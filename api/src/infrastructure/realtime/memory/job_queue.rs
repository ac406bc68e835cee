use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::application::ports::job_queue_port::{BackgroundJob, JobQueuePort, QueuedJob};

/// In-process job queue with a single consumer.
pub struct InMemoryJobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedJob>>>,
    next_id: AtomicU64,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueuePort for InMemoryJobQueue {
    async fn enqueue(&self, job: &BackgroundJob) -> anyhow::Result<String> {
        let entry_id = format!("{}-0", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tx
            .send(QueuedJob {
                entry_id: entry_id.clone(),
                job: job.clone(),
            })
            .map_err(|_| anyhow!("job queue consumer dropped"))?;
        Ok(entry_id)
    }

    async fn subscribe(&self) -> anyhow::Result<BoxStream<'static, anyhow::Result<QueuedJob>>> {
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("job queue already has a consumer"))?;
        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }

    async fn ack(&self, entry_id: &str) -> anyhow::Result<()> {
        tracing::trace!(entry_id, "memory_job_acked");
        Ok(())
    }
}
