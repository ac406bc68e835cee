use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::application::ports::job_queue_port::{BackgroundJob, JobQueuePort};

/// Decides when documents need a checkpoint and queues the work.
///
/// Every `every_ops`-th sequence triggers one immediately; anything else written
/// since the last sweep is picked up by the periodic sweeper.
#[derive(Clone)]
pub struct CheckpointScheduler {
    queue: Arc<dyn JobQueuePort>,
    every_ops: i64,
    dirty: Arc<Mutex<HashSet<String>>>,
}

impl CheckpointScheduler {
    pub fn new(queue: Arc<dyn JobQueuePort>, every_ops: i64) -> Self {
        Self {
            queue,
            every_ops,
            dirty: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn record_append(&self, doc_id: &str, seq: i64) {
        if self.every_ops > 0 && seq % self.every_ops == 0 {
            self.dirty.lock().await.remove(doc_id);
            self.request(doc_id).await;
        } else {
            self.dirty.lock().await.insert(doc_id.to_string());
        }
    }

    pub async fn request(&self, doc_id: &str) {
        let job = BackgroundJob::Checkpoint {
            doc_id: doc_id.to_string(),
            attempt: 0,
        };
        match self.queue.enqueue(&job).await {
            Ok(entry_id) => {
                tracing::debug!(document_id = doc_id, entry_id = %entry_id, "checkpoint_requested")
            }
            Err(e) => {
                tracing::error!(document_id = doc_id, error = ?e, "checkpoint_request_failed")
            }
        }
    }

    /// Queues a checkpoint for every document written since the previous sweep.
    pub async fn sweep(&self) -> usize {
        let docs: Vec<String> = self.dirty.lock().await.drain().collect();
        for doc_id in &docs {
            self.request(doc_id).await;
        }
        docs.len()
    }

    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let queued = scheduler.sweep().await;
                if queued > 0 {
                    tracing::info!(documents = queued, "checkpoint_sweep_queued");
                }
            }
        })
    }
}

/// Enqueues `job` once `delay` has passed, without blocking the caller.
pub fn enqueue_after(
    queue: Arc<dyn JobQueuePort>,
    job: BackgroundJob,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Err(e) = queue.enqueue(&job).await {
            tracing::error!(document_id = job.doc_id(), error = ?e, "delayed_enqueue_failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::infrastructure::realtime::memory::InMemoryJobQueue;

    #[tokio::test]
    async fn every_nth_sequence_requests_checkpoint() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let scheduler = CheckpointScheduler::new(queue.clone(), 3);
        let mut jobs = queue.subscribe().await.unwrap();

        for seq in 1..=3 {
            scheduler.record_append("doc", seq).await;
        }
        let queued = jobs.next().await.unwrap().unwrap();
        assert_eq!(
            queued.job,
            BackgroundJob::Checkpoint {
                doc_id: "doc".into(),
                attempt: 0
            }
        );
        assert_eq!(scheduler.sweep().await, 0);
    }

    #[tokio::test]
    async fn sweep_drains_dirty_documents() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let scheduler = CheckpointScheduler::new(queue.clone(), 1000);
        let mut jobs = queue.subscribe().await.unwrap();

        scheduler.record_append("a", 1).await;
        scheduler.record_append("b", 7).await;
        scheduler.record_append("a", 2).await;
        assert_eq!(scheduler.sweep().await, 2);
        assert_eq!(scheduler.sweep().await, 0);

        let mut docs = vec![
            jobs.next().await.unwrap().unwrap().job.doc_id().to_string(),
            jobs.next().await.unwrap().unwrap().job.doc_id().to_string(),
        ];
        docs.sort();
        assert_eq!(docs, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_enqueue_waits() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let mut jobs = queue.subscribe().await.unwrap();
        let job = BackgroundJob::SummarizeSession {
            doc_id: "doc".into(),
            user_id: "u".into(),
            author_id: "1".into(),
            last_message_at: None,
        };
        enqueue_after(queue.clone(), job.clone(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(1), jobs.next())
                .await
                .is_err()
        );
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(jobs.next().await.unwrap().unwrap().job, job);
    }
}
