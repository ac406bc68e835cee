use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::application::ports::job_queue_port::{BackgroundJob, JobQueuePort, QueuedJob};

const FIELD_JOB: &str = "job";
const READ_BLOCK_MS: usize = 1000;
const READ_COUNT: usize = 128;

/// Where a process reads the job stream from.
#[derive(Debug, Clone)]
pub struct JobStreamOptions {
    pub stream_key: String,
    /// Consumer group shared by every server instance; each job goes to one member.
    pub group: String,
    /// Stable per-instance name so a restart picks up its own unacknowledged jobs.
    pub consumer: String,
    pub max_len: Option<usize>,
    pub poll_interval: Duration,
}

/// Background jobs carried on a Redis stream, consumed through a consumer group
/// and deleted once acknowledged.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: Arc<redis::Client>,
    options: Arc<JobStreamOptions>,
}

impl RedisJobQueue {
    pub fn new(client: redis::Client, mut options: JobStreamOptions) -> Self {
        options.max_len = options.max_len.filter(|len| *len > 0);
        Self {
            client: Arc::new(client),
            options: Arc::new(options),
        }
    }
}

async fn ensure_group(
    conn: &mut MultiplexedConnection,
    key: &str,
    group: &str,
) -> redis::RedisResult<()> {
    let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(key, group, "0").await;
    match created {
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        other => other,
    }
}

/// `None` for entries whose payload is gone, such as pending ids trimmed from the stream.
fn decode_entry(entry: &StreamId) -> Option<anyhow::Result<QueuedJob>> {
    let raw = entry.get::<String>(FIELD_JOB)?;
    Some(
        serde_json::from_str::<BackgroundJob>(&raw)
            .map(|job| QueuedJob {
                entry_id: entry.id.clone(),
                job,
            })
            .with_context(|| format!("job_decode entry={}", entry.id)),
    )
}

#[async_trait]
impl JobQueuePort for RedisJobQueue {
    async fn enqueue(&self, job: &BackgroundJob) -> anyhow::Result<String> {
        let payload = serde_json::to_string(job).context("job_serialize")?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("redis_get_async_connection")?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.options.stream_key);
        if let Some(max_len) = self.options.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len as i64);
        }
        let id: String = cmd
            .arg("*")
            .arg(FIELD_JOB)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context("redis_xadd_job")?;
        Ok(id)
    }

    /// Replays this consumer's unacknowledged jobs first, then follows new ones.
    async fn subscribe(&self) -> anyhow::Result<BoxStream<'static, anyhow::Result<QueuedJob>>> {
        let client = self.client.clone();
        let options = self.options.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let key = options.stream_key.as_str();
            let group = options.group.as_str();
            // Some(id) while replaying pending entries after `id`; None once caught up.
            let mut backlog: Option<String> = Some("0".to_string());
            loop {
                let mut conn = match client.get_multiplexed_async_connection().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(stream = %key, error = ?e, "redis_job_stream_connect_failed");
                        sleep(options.poll_interval).await;
                        continue;
                    }
                };
                if let Err(e) = ensure_group(&mut conn, key, group).await {
                    tracing::error!(stream = %key, group = %group, error = ?e, "redis_job_group_create_failed");
                    sleep(options.poll_interval).await;
                    continue;
                }
                loop {
                    let mut opts = StreamReadOptions::default()
                        .group(group, &options.consumer)
                        .count(READ_COUNT);
                    if backlog.is_none() {
                        opts = opts.block(READ_BLOCK_MS);
                    }
                    let ids = [backlog.as_deref().unwrap_or(">")];
                    let reply: redis::RedisResult<StreamReadReply> =
                        conn.xread_options(&[key], &ids, &opts).await;
                    let data = match reply {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::warn!(stream = %key, error = ?e, "redis_job_stream_read_failed");
                            sleep(options.poll_interval).await;
                            break;
                        }
                    };
                    let mut last_seen = None;
                    for entry in data.keys.into_iter().flat_map(|k| k.ids) {
                        last_seen = Some(entry.id.clone());
                        match decode_entry(&entry) {
                            Some(item) => {
                                if tx.send(item).is_err() {
                                    return;
                                }
                            }
                            None => {
                                let acked: redis::RedisResult<i64> =
                                    conn.xack(key, group, &[entry.id.as_str()]).await;
                                if let Err(e) = acked {
                                    tracing::debug!(stream = %key, entry = %entry.id, error = ?e, "redis_job_stale_ack_failed");
                                }
                            }
                        }
                    }
                    if backlog.is_some() {
                        if last_seen.is_none() {
                            tracing::debug!(stream = %key, consumer = %options.consumer, "redis_job_backlog_drained");
                        }
                        backlog = last_seen;
                    }
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn ack(&self, entry_id: &str) -> anyhow::Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("redis_get_async_connection")?;
        let key = &self.options.stream_key;
        let _: () = redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(key)
            .arg(&self.options.group)
            .arg(entry_id)
            .ignore()
            .cmd("XDEL")
            .arg(key)
            .arg(entry_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("redis_xack_job")?;
        Ok(())
    }
}
