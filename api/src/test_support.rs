use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use futures_util::sink;
use futures_util::stream::BoxStream;
use serde_json::Value;
use tokio::sync::mpsc;
use yrs::{Doc, ReadTxn, StateVector, Text, Transact};

use crate::application::ports::access_repository::AccessRepository;
use crate::application::ports::author_repository::AuthorRepository;
use crate::application::ports::document_engine::DocumentEngine;
use crate::application::ports::document_repository::{DocumentRecord, DocumentRepository};
use crate::application::ports::event_log_port::{EventLogPort, TimelineEvent};
use crate::application::ports::job_queue_port::{JobQueuePort, QueuedJob};
use crate::application::ports::object_store_port::ObjectStorePort;
use crate::application::ports::realtime_port::RealtimeError;
use crate::application::ports::realtime_types::DynRealtimeSink;
use crate::application::ports::user_repository::{UserProfile, UserRepository};
use crate::application::services::realtime::assembler::DocumentAssembler;
use crate::application::services::realtime::checkpoint::CheckpointScheduler;
use crate::application::services::realtime::delta_log::DeltaLog;
use crate::application::services::realtime::presence::PresenceBroadcaster;
use crate::application::services::realtime::snapshot::SnapshotStore;
use crate::application::session::{SessionDeps, SessionSettings};
use crate::infrastructure::engine::{CONTENT_ROOT, YrsDocumentEngine};
use crate::infrastructure::realtime::memory::{
    InMemoryDeltaLog, InMemoryJobQueue, InMemoryPresenceBus,
};

pub fn engine() -> Arc<dyn DocumentEngine> {
    Arc::new(YrsDocumentEngine)
}

/// A client-side replica producing ops the way an editor would.
pub struct ClientDoc {
    doc: Doc,
}

impl ClientDoc {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    pub fn insert(&self, index: u32, chunk: &str) -> String {
        let text = self.doc.get_or_insert_text(CONTENT_ROOT);
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            text.insert(&mut txn, index, chunk);
        }
        let update = self.doc.transact().encode_diff_v1(&before);
        BASE64.encode(update)
    }

    /// One op per character, as typed.
    pub fn type_text(&self, index: u32, text: &str) -> Vec<String> {
        text.chars()
            .enumerate()
            .map(|(i, c)| self.insert(index + i as u32, &c.to_string()))
            .collect()
    }

    pub fn full_state_op(&self) -> String {
        let update = self
            .doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default());
        BASE64.encode(update)
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorePort for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        _content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn list_first(&self, prefix: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .next()
            .cloned())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Users, documents, access grants, author ids and timeline events in memory.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: Mutex<HashMap<String, UserProfile>>,
    documents: Mutex<HashMap<String, DocumentRecord>>,
    grants: Mutex<HashSet<(String, String)>>,
    authors: Mutex<Vec<(String, String, i64)>>,
    events: Mutex<Vec<TimelineEvent>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, name: &str, color: &str) {
        self.users.lock().unwrap().insert(
            id.to_string(),
            UserProfile {
                id: id.to_string(),
                name: name.to_string(),
                highlight_color: color.to_string(),
            },
        );
    }

    pub fn remove_user(&self, id: &str) {
        self.users.lock().unwrap().remove(id);
    }

    pub fn profile(&self, id: &str) -> Option<UserProfile> {
        self.users.lock().unwrap().get(id).cloned()
    }

    pub fn add_document(&self, id: &str, updated_at: DateTime<Utc>) {
        self.documents.lock().unwrap().insert(
            id.to_string(),
            DocumentRecord {
                id: id.to_string(),
                title: format!("Document {id}"),
                updated_at,
            },
        );
    }

    pub fn grant(&self, doc_id: &str, user_id: &str) {
        self.grants
            .lock()
            .unwrap()
            .insert((doc_id.to_string(), user_id.to_string()));
    }

    pub fn updated_at(&self, doc_id: &str) -> Option<DateTime<Utc>> {
        self.documents
            .lock()
            .unwrap()
            .get(doc_id)
            .map(|d| d.updated_at)
    }

    pub fn events(&self) -> Vec<TimelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccessRepository for InMemoryDirectory {
    async fn can_edit(&self, doc_id: &str, user_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .grants
            .lock()
            .unwrap()
            .contains(&(doc_id.to_string(), user_id.to_string())))
    }
}

#[async_trait]
impl AuthorRepository for InMemoryDirectory {
    async fn validate_author_id(
        &self,
        author_id: &str,
        doc_id: &str,
        user_id: &str,
    ) -> anyhow::Result<bool> {
        let Ok(author) = i64::from_str_radix(author_id, 16) else {
            return Ok(false);
        };
        Ok(self
            .authors
            .lock()
            .unwrap()
            .iter()
            .any(|(d, u, a)| d == doc_id && u == user_id && *a == author))
    }

    async fn new_author_id(&self, doc_id: &str, user_id: &str) -> anyhow::Result<String> {
        let mut authors = self.authors.lock().unwrap();
        let next = authors
            .iter()
            .filter(|(d, _, _)| d == doc_id)
            .map(|(_, _, a)| *a)
            .max()
            .unwrap_or(0)
            + 1;
        authors.push((doc_id.to_string(), user_id.to_string(), next));
        Ok(format!("{next:x}"))
    }
}

#[async_trait]
impl UserRepository for InMemoryDirectory {
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.profile(id))
    }

    async fn find_profiles(&self, ids: &[String]) -> anyhow::Result<HashMap<String, UserProfile>> {
        let users = self.users.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| users.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDirectory {
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<DocumentRecord>> {
        Ok(self.documents.lock().unwrap().get(id).cloned())
    }

    async fn touch_updated_at(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(doc) = self.documents.lock().unwrap().get_mut(id) {
            doc.updated_at = at;
        }
        Ok(())
    }
}

#[async_trait]
impl EventLogPort for InMemoryDirectory {
    async fn record(&self, event: TimelineEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Fully wired in-memory session dependencies.
///
/// Seeds users `u1` and `u2` with edit access to `doc`, and `u3` without.
pub struct Harness {
    pub deps: SessionDeps,
    pub directory: Arc<InMemoryDirectory>,
    pub objects: Arc<MemoryObjectStore>,
    pub delta_cache: Arc<InMemoryDeltaLog>,
    pub jobs: Arc<InMemoryJobQueue>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_checkpoint_every(1000)
    }

    pub fn with_checkpoint_every(every_ops: i64) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user("u1", "Ada", "#ff0000");
        directory.add_user("u2", "Grace", "#00ff00");
        directory.add_user("u3", "Linus", "#0000ff");
        directory.add_document("doc", Utc::now() - chrono::Duration::hours(1));
        directory.grant("doc", "u1");
        directory.grant("doc", "u2");

        let objects = Arc::new(MemoryObjectStore::new());
        let snapshots = SnapshotStore::new(objects.clone(), engine(), "v3");
        let delta_cache = Arc::new(InMemoryDeltaLog::new());
        let delta_log = DeltaLog::new(delta_cache.clone(), snapshots.clone());
        let jobs = Arc::new(InMemoryJobQueue::new());
        let presence = PresenceBroadcaster::new(
            Arc::new(InMemoryPresenceBus::new()),
            directory.clone(),
            Duration::from_secs(5),
        );

        let deps = SessionDeps {
            assembler: DocumentAssembler::new(snapshots, delta_log),
            presence,
            scheduler: CheckpointScheduler::new(jobs.clone(), every_ops),
            jobs: jobs.clone(),
            objects: objects.clone(),
            access: directory.clone(),
            authors: directory.clone(),
            documents: directory.clone(),
            events: directory.clone(),
            settings: SessionSettings {
                ping_interval: Duration::from_secs(3600),
                touch_stale: Duration::from_secs(60),
                summarize_delay: Duration::ZERO,
                audit_flush_interval: Duration::from_secs(3600),
            },
        };
        Self {
            deps,
            directory,
            objects,
            delta_cache,
            jobs,
        }
    }

    pub fn profile(&self, user_id: &str) -> UserProfile {
        self.directory.profile(user_id).unwrap()
    }

    pub async fn take_jobs(&self) -> BoxStream<'static, anyhow::Result<QueuedJob>> {
        self.jobs.subscribe().await.unwrap()
    }
}

/// A sink that hands every written frame to the returned receiver.
pub fn channel_sink() -> (DynRealtimeSink, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let sink = sink::unfold(tx, |tx, frame: String| async move {
        tx.send(frame).map_err(RealtimeError::new)?;
        Ok::<_, RealtimeError>(tx)
    });
    let sink: std::pin::Pin<
        Box<dyn futures_util::Sink<String, Error = RealtimeError> + Send + 'static>,
    > = Box::pin(sink);
    (Arc::new(tokio::sync::Mutex::new(sink)), rx)
}

fn as_value(frame: String) -> Value {
    serde_json::from_str(&frame).unwrap_or(Value::String(frame))
}

/// Next frame as JSON; non-JSON frames (raw ops) come back as strings.
pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("sink closed");
    as_value(frame)
}

pub async fn next_frame_where<F>(rx: &mut mpsc::UnboundedReceiver<String>, mut pred: F) -> Value
where
    F: FnMut(&Value) -> bool,
{
    loop {
        let frame = next_frame(rx).await;
        if pred(&frame) {
            return frame;
        }
    }
}
