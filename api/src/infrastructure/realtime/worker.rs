use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::application::ports::job_queue_port::{BackgroundJob, JobQueuePort, QueuedJob};
use crate::application::services::realtime::assembler::DocumentAssembler;
use crate::application::services::realtime::checkpoint::enqueue_after;

#[derive(Clone, Copy, Debug)]
pub struct WorkerOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Consumes background jobs until the queue stream ends.
pub fn spawn_checkpoint_worker(
    queue: Arc<dyn JobQueuePort>,
    assembler: DocumentAssembler,
    options: WorkerOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut jobs = match queue.subscribe().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = ?e, "job_worker_subscribe_failed");
                return;
            }
        };
        tracing::info!(max_attempts = options.max_attempts, "job_worker_started");
        while let Some(next) = jobs.next().await {
            match next {
                Ok(queued) => handle_job(&queue, &assembler, options, queued).await,
                Err(e) => tracing::warn!(error = ?e, "job_stream_item_invalid"),
            }
        }
        tracing::info!("job_worker_stopped");
    })
}

async fn handle_job(
    queue: &Arc<dyn JobQueuePort>,
    assembler: &DocumentAssembler,
    options: WorkerOptions,
    queued: QueuedJob,
) {
    match &queued.job {
        BackgroundJob::Checkpoint { doc_id, attempt } => {
            if let Err(e) = assembler.checkpoint(doc_id).await {
                let next_attempt = attempt + 1;
                if next_attempt < options.max_attempts {
                    tracing::warn!(
                        document_id = %doc_id,
                        attempt = next_attempt,
                        error = ?e,
                        "checkpoint_failed_retrying"
                    );
                    enqueue_after(
                        queue.clone(),
                        BackgroundJob::Checkpoint {
                            doc_id: doc_id.clone(),
                            attempt: next_attempt,
                        },
                        options.retry_delay,
                    );
                } else {
                    tracing::error!(
                        document_id = %doc_id,
                        attempts = next_attempt,
                        error = ?e,
                        "checkpoint_abandoned"
                    );
                }
            }
        }
        BackgroundJob::SummarizeSession {
            doc_id,
            user_id,
            author_id,
            last_message_at,
        } => {
            tracing::info!(
                document_id = %doc_id,
                user_id = %user_id,
                author_id = %author_id,
                last_message_at = ?last_message_at,
                "session_summary_requested"
            );
        }
    }
    if let Err(e) = queue.ack(&queued.entry_id).await {
        tracing::warn!(entry_id = %queued.entry_id, error = ?e, "job_ack_failed");
    }
}
