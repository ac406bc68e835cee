use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::application::ports::object_store_port::ObjectStorePort;

const LOG_CONTENT_TYPE: &str = "text/plain";
const ID_PREFIX_LEN: usize = 5;

static LINE_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<level>[A-Z]+) \[(?P<user>[^|\]]*)\|(?P<session>[^\]]*)\]: (?P<message>.*)$")
        .expect("valid regex")
});

pub fn audit_log_prefix(doc_id: &str) -> String {
    format!("logs/{doc_id}/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    fn as_str(self) -> &'static str {
        match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warn => "WARN",
            AuditLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub user: Option<String>,
    pub session: Option<String>,
    pub message: String,
}

/// Buffered, per-session activity log persisted to object storage in chunks.
#[derive(Clone)]
pub struct DocAuditLog {
    inner: Arc<AuditInner>,
}

struct AuditInner {
    objects: Arc<dyn ObjectStorePort>,
    doc_id: String,
    prefix: String,
    buffer: Mutex<String>,
    active: AtomicBool,
}

fn short(id: &str) -> &str {
    match id.char_indices().nth(ID_PREFIX_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

impl DocAuditLog {
    pub fn new(
        objects: Arc<dyn ObjectStorePort>,
        doc_id: impl Into<String>,
        user_id: &str,
        session_id: &str,
    ) -> Self {
        Self {
            inner: Arc::new(AuditInner {
                objects,
                doc_id: doc_id.into(),
                prefix: format!("{}|{}", short(user_id), short(session_id)),
                buffer: Mutex::new(String::new()),
                active: AtomicBool::new(true),
            }),
        }
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        self.write(AuditLevel::Info, message.as_ref()).await;
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        self.write(AuditLevel::Warn, message.as_ref()).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        self.write(AuditLevel::Error, message.as_ref()).await;
    }

    async fn write(&self, level: AuditLevel, message: &str) {
        if !self.inner.active.load(Ordering::Relaxed) {
            return;
        }
        let line = format!(
            "{}@{} [{}]: {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            level.as_str(),
            self.inner.prefix,
            message.replace('\n', " ")
        );
        self.inner.buffer.lock().await.push_str(&line);
    }

    /// Writes buffered lines as a new chunk. Returns false when there was nothing to write.
    pub async fn flush(&self) -> anyhow::Result<bool> {
        let chunk = {
            let mut buffer = self.inner.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(false);
            }
            std::mem::take(&mut *buffer)
        };
        let key = format!(
            "{}{}.log",
            audit_log_prefix(&self.inner.doc_id),
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        if let Err(e) = self
            .inner
            .objects
            .put_object(&key, LOG_CONTENT_TYPE, chunk.clone().into_bytes())
            .await
        {
            let mut buffer = self.inner.buffer.lock().await;
            buffer.insert_str(0, &chunk);
            return Err(e).context("audit_log_flush");
        }
        Ok(true)
    }

    pub fn spawn_flusher(&self, interval: Duration) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = log.flush().await {
                    tracing::warn!(document_id = %log.inner.doc_id, error = ?e, "audit_log_flush_failed");
                }
            }
        })
    }

    /// Flushes what is buffered; later writes are dropped.
    pub async fn close(&self) {
        self.inner.active.store(false, Ordering::Relaxed);
        if let Err(e) = self.flush().await {
            tracing::error!(document_id = %self.inner.doc_id, error = ?e, "audit_log_close_flush_failed");
        }
    }
}

fn parse_line(line: &str) -> anyhow::Result<AuditEntry> {
    let (timestamp, body) = line
        .split_once('@')
        .context("audit_line_missing_separator")?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .context("audit_line_timestamp")?
        .with_timezone(&Utc);
    Ok(match LINE_BODY.captures(body) {
        Some(caps) => AuditEntry {
            timestamp,
            level: caps["level"].to_string(),
            user: Some(caps["user"].to_string()),
            session: Some(caps["session"].to_string()),
            message: caps["message"].to_string(),
        },
        None => AuditEntry {
            timestamp,
            level: String::new(),
            user: None,
            session: None,
            message: body.to_string(),
        },
    })
}

/// Every persisted audit line for a document, ordered by timestamp.
pub async fn read_audit_log(
    objects: &dyn ObjectStorePort,
    doc_id: &str,
) -> anyhow::Result<Vec<AuditEntry>> {
    let keys = objects
        .list(&audit_log_prefix(doc_id))
        .await
        .context("audit_log_list")?;
    let mut entries = Vec::new();
    for key in keys {
        let Some(bytes) = objects.get_object(&key).await.context("audit_log_get")? else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match parse_line(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!(key = %key, error = ?e, "audit_line_skipped"),
            }
        }
    }
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(entries)
}
