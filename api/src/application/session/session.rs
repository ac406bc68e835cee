use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::SessionError;
use super::protocol::{
    ClientMessage, EVENT_LOADED, EVENT_PASTE, EVENT_PING, EVENT_PONG, EventMessage, FrameKind,
    OpMessage, SubscribeMessage, auth_frame, error_frame, event_frame,
};
use crate::application::ports::access_repository::AccessRepository;
use crate::application::ports::author_repository::AuthorRepository;
use crate::application::ports::document_repository::DocumentRepository;
use crate::application::ports::event_log_port::{EventLogPort, TimelineEvent};
use crate::application::ports::job_queue_port::{BackgroundJob, JobQueuePort};
use crate::application::ports::object_store_port::ObjectStorePort;
use crate::application::ports::realtime_types::{DynRealtimeSink, DynRealtimeStream};
use crate::application::ports::user_repository::UserProfile;
use crate::application::services::realtime::assembler::DocumentAssembler;
use crate::application::services::realtime::audit_log::DocAuditLog;
use crate::application::services::realtime::checkpoint::{CheckpointScheduler, enqueue_after};
use crate::application::services::realtime::presence::{PresenceBroadcaster, SubscriptionHandle};
use crate::domain::documents::cursor::{CursorOperation, PresenceIdentity};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ping_interval: Duration,
    /// Minimum age of `updated_at` before an op refreshes it.
    pub touch_stale: Duration,
    pub summarize_delay: Duration,
    pub audit_flush_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            touch_stale: Duration::from_secs(60),
            summarize_delay: Duration::from_secs(10),
            audit_flush_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct SessionDeps {
    pub assembler: DocumentAssembler,
    pub presence: PresenceBroadcaster,
    pub scheduler: CheckpointScheduler,
    pub jobs: Arc<dyn JobQueuePort>,
    pub objects: Arc<dyn ObjectStorePort>,
    pub access: Arc<dyn AccessRepository>,
    pub authors: Arc<dyn AuthorRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub events: Arc<dyn EventLogPort>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Subscribed,
    Closed,
}

struct SessionState {
    phase: SessionPhase,
    author_id: Option<String>,
    touched_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionTasks {
    keepalive: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    audit_flusher: Option<JoinHandle<()>>,
    subscription: Option<SubscriptionHandle>,
}

/// One client connection bound to one document.
///
/// Inbound messages are handled one at a time. Fan-out deliveries take the
/// state lock before writing, so they never interleave with the subscribe
/// handshake and always follow the frames it sends.
pub struct Session {
    id: Uuid,
    doc_id: String,
    user: UserProfile,
    deps: SessionDeps,
    state: Mutex<SessionState>,
    sink: DynRealtimeSink,
    last_pong: Mutex<Instant>,
    tasks: Mutex<SessionTasks>,
    audit: DocAuditLog,
}

impl Session {
    /// Checks the document and the user's edit right, then starts keepalive pings.
    pub async fn open(
        deps: SessionDeps,
        user: UserProfile,
        doc_id: String,
        sink: DynRealtimeSink,
    ) -> Result<Arc<Self>, SessionError> {
        let record = deps
            .documents
            .get_by_id(&doc_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if !deps.access.can_edit(&doc_id, &user.id).await? {
            return Err(SessionError::AccessDenied);
        }

        let id = Uuid::new_v4();
        let audit = DocAuditLog::new(
            deps.objects.clone(),
            doc_id.clone(),
            &user.id,
            &id.simple().to_string(),
        );
        let ping_interval = deps.settings.ping_interval;
        let flush_interval = deps.settings.audit_flush_interval;
        let session = Arc::new(Self {
            id,
            doc_id,
            user,
            deps,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Connected,
                author_id: None,
                touched_at: record.updated_at,
            }),
            sink,
            last_pong: Mutex::new(Instant::now()),
            tasks: Mutex::new(SessionTasks::default()),
            audit,
        });
        {
            let mut tasks = session.tasks.lock().await;
            tasks.keepalive = Some(spawn_keepalive(Arc::downgrade(&session), ping_interval));
            tasks.audit_flusher = Some(session.audit.spawn_flusher(flush_interval));
        }
        tracing::info!(
            document_id = %session.doc_id,
            session_id = %session.id,
            user_id = %session.user.id,
            "session_opened"
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase
    }

    pub async fn author_id(&self) -> Option<String> {
        self.state.lock().await.author_id.clone()
    }

    /// Drives the session until the client disconnects or a fatal error occurs.
    pub async fn run(self: Arc<Self>, mut inbound: DynRealtimeStream) {
        while let Some(frame) = inbound.next().await {
            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(session_id = %self.id, error = %e, "session_inbound_error");
                    break;
                }
            };
            if let Err(err) = self.handle_message(&text).await {
                tracing::warn!(
                    document_id = %self.doc_id,
                    session_id = %self.id,
                    error = %err,
                    fatal = err.is_fatal(),
                    "session_message_failed"
                );
                if err.reportable() {
                    match &err {
                        SessionError::Storage(_) => self.audit.error(err.to_string()).await,
                        _ => self.audit.warn(err.to_string()).await,
                    }
                    if let Err(e) = self.write_raw(error_frame(&err.to_string())).await {
                        tracing::debug!(session_id = %self.id, error = %e, "session_error_frame_failed");
                    }
                }
                if err.is_fatal() {
                    break;
                }
            }
        }
        self.close().await;
    }

    pub async fn handle_message(self: &Arc<Self>, text: &str) -> Result<(), SessionError> {
        let message = ClientMessage::parse(text)?;
        self.deps
            .presence
            .mark_last_message(&self.doc_id, &self.user.id, Utc::now().timestamp())
            .await;
        match message {
            ClientMessage::Subscribe(sub) => {
                self.audit.info(format!("-> {text}")).await;
                self.handle_subscribe(sub).await
            }
            ClientMessage::Op(op) => {
                self.audit.info(format!("-> {text}")).await;
                self.handle_op(op).await
            }
            ClientMessage::Cursor(raw) => self.handle_cursor(&raw).await,
            ClientMessage::Event(event) => self.handle_event(event).await,
        }
    }

    async fn handle_subscribe(self: &Arc<Self>, sub: SubscribeMessage) -> Result<(), SessionError> {
        if sub.doc_id != self.doc_id {
            return Err(SessionError::DocumentMismatch {
                expected: self.doc_id.clone(),
                got: sub.doc_id,
            });
        }

        let mut state = self.state.lock().await;
        match state.phase {
            SessionPhase::Closed => return Err(SessionError::Transport("session closed".into())),
            SessionPhase::Subscribed => {
                if let Some(author_id) = state.author_id.take() {
                    self.release_presence(&self.identity_for(&author_id)).await;
                }
                state.phase = SessionPhase::Connected;
            }
            SessionPhase::Connected => {}
        }

        if !self.deps.access.can_edit(&self.doc_id, &self.user.id).await? {
            return Err(SessionError::AccessDenied);
        }
        let author_id = self.resolve_author_id(sub.author_id.as_deref()).await?;

        // Opened before assembling so nothing published in between is lost;
        // deliveries wait on the state lock held here.
        let weak = Arc::downgrade(self);
        let subscription = self
            .deps
            .presence
            .subscribe(&self.doc_id, move |payload| {
                let weak = weak.clone();
                async move {
                    if let Some(session) = weak.upgrade() {
                        session.forward(payload).await;
                    }
                }
            })
            .await?;

        let assembled = self.deps.assembler.assemble(&self.doc_id).await?;
        self.send_frame(auth_frame(&author_id), FrameKind::Other).await?;
        let snapshot = assembled.document.snapshot_op()?;
        self.send_frame(snapshot.to_string(), FrameKind::Other).await?;
        self.send_frame(event_frame(EVENT_LOADED), FrameKind::Other).await?;
        for cursor in self.deps.presence.current_cursors(&self.doc_id).await? {
            let frame = serde_json::to_string(&cursor).map_err(anyhow::Error::from)?;
            self.send_frame(frame, FrameKind::Cursor).await?;
        }

        let identity = self.identity_for(&author_id);
        self.deps.presence.register(&identity).await?;

        state.phase = SessionPhase::Subscribed;
        state.author_id = Some(author_id.clone());

        let heartbeat = spawn_presence_heartbeat(
            Arc::downgrade(self),
            identity,
            self.deps.presence.refresh_interval(),
        );
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(previous) = tasks.subscription.replace(subscription) {
                previous.cancel();
            }
            if let Some(previous) = tasks.heartbeat.replace(heartbeat) {
                previous.abort();
            }
        }

        tracing::info!(
            document_id = %self.doc_id,
            session_id = %self.id,
            author_id = %author_id,
            seq = assembled.sequence,
            skipped = assembled.skipped,
            "session_subscribed"
        );
        Ok(())
    }

    async fn resolve_author_id(&self, requested: Option<&str>) -> Result<String, SessionError> {
        if let Some(candidate) = requested {
            match self
                .deps
                .authors
                .validate_author_id(candidate, &self.doc_id, &self.user.id)
                .await
            {
                Ok(true) => return Ok(candidate.to_string()),
                Ok(false) => tracing::warn!(
                    document_id = %self.doc_id,
                    user_id = %self.user.id,
                    author_id = candidate,
                    "session_author_id_rejected"
                ),
                Err(e) => tracing::warn!(
                    document_id = %self.doc_id,
                    user_id = %self.user.id,
                    error = ?e,
                    "session_author_id_validation_failed"
                ),
            }
        }
        Ok(self
            .deps
            .authors
            .new_author_id(&self.doc_id, &self.user.id)
            .await?)
    }

    async fn handle_op(&self, op: OpMessage) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.phase != SessionPhase::Subscribed {
            return Err(SessionError::NotSubscribed);
        }

        let seq = self
            .deps
            .assembler
            .delta_log()
            .append(&self.doc_id, &op.op)
            .await?;
        self.deps.scheduler.record_append(&self.doc_id, seq).await;
        self.deps.presence.publish(&self.doc_id, &op.op).await?;

        let now = Utc::now();
        let stale = now
            .signed_duration_since(state.touched_at)
            .to_std()
            .map(|age| age >= self.deps.settings.touch_stale)
            .unwrap_or(false);
        if stale {
            match self.deps.documents.touch_updated_at(&self.doc_id, now).await {
                Ok(()) => state.touched_at = now,
                Err(e) => {
                    tracing::warn!(document_id = %self.doc_id, error = ?e, "document_touch_failed")
                }
            }
        }
        tracing::trace!(document_id = %self.doc_id, session_id = %self.id, seq, "session_op_appended");
        Ok(())
    }

    async fn handle_cursor(&self, raw: &str) -> Result<(), SessionError> {
        let op: CursorOperation =
            serde_json::from_str(raw).map_err(|e| SessionError::Malformed(format!("cursor: {e}")))?;
        let author_id = {
            let state = self.state.lock().await;
            match (&state.phase, &state.author_id) {
                (SessionPhase::Subscribed, Some(author_id)) => author_id.clone(),
                _ => return Err(SessionError::NotSubscribed),
            }
        };
        self.deps
            .presence
            .publish_cursor(&self.identity_for(&author_id), op)
            .await?;
        Ok(())
    }

    async fn handle_event(&self, event: EventMessage) -> Result<(), SessionError> {
        match event.event.as_str() {
            EVENT_PONG => *self.last_pong.lock().await = Instant::now(),
            EVENT_PASTE => {
                self.audit
                    .info(format!("-> paste {}", Value::Object(event.data.clone())))
                    .await;
                self.record_paste(event.data).await;
            }
            other => {
                tracing::debug!(session_id = %self.id, event = other, "session_event_ignored")
            }
        }
        Ok(())
    }

    async fn record_paste(&self, data: Map<String, Value>) {
        let has_addresses = ["contentAddressBefore", "contentAddressAfter"]
            .iter()
            .all(|field| data.get(*field).and_then(Value::as_str).is_some());
        if !has_addresses {
            tracing::warn!(document_id = %self.doc_id, session_id = %self.id, "session_paste_incomplete");
            return;
        }
        let event = TimelineEvent {
            doc_id: self.doc_id.clone(),
            user_id: self.user.id.clone(),
            author_id: self.state.lock().await.author_id.clone(),
            kind: EVENT_PASTE.to_string(),
            payload: Value::Object(data),
        };
        let events = self.deps.events.clone();
        tokio::spawn(async move {
            let doc_id = event.doc_id.clone();
            if let Err(e) = events.record(event).await {
                tracing::warn!(document_id = %doc_id, error = ?e, "timeline_event_record_failed");
            }
        });
    }

    async fn forward(&self, payload: String) {
        let state = self.state.lock().await;
        if state.phase == SessionPhase::Closed {
            return;
        }
        let kind = FrameKind::of_payload(&payload);
        if let Err(e) = self.send_frame(payload, kind).await {
            tracing::debug!(session_id = %self.id, error = %e, "session_forward_failed");
        }
    }

    async fn send_frame(&self, frame: String, kind: FrameKind) -> Result<(), SessionError> {
        if kind != FrameKind::Cursor {
            self.audit.info(format!("<- {frame}")).await;
        }
        self.write_raw(frame).await
    }

    async fn write_raw(&self, frame: String) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        sink.send(frame)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    fn identity_for(&self, author_id: &str) -> PresenceIdentity {
        PresenceIdentity {
            doc_id: self.doc_id.clone(),
            user_id: self.user.id.clone(),
            author_id: author_id.to_string(),
            name: self.user.name.clone(),
            color: self.user.highlight_color.clone(),
        }
    }

    async fn release_presence(&self, identity: &PresenceIdentity) {
        if let Some(subscription) = self.tasks.lock().await.subscription.take() {
            subscription.cancel();
        }
        if let Err(e) = self.deps.presence.deregister(identity).await {
            tracing::warn!(document_id = %self.doc_id, session_id = %self.id, error = ?e, "presence_deregister_failed");
        }
    }

    /// Releases everything the session holds. Safe to call more than once.
    ///
    /// The phase flips to `Closed` before tasks are drained; subscribe installs its
    /// tasks under the state lock, so none can appear after the drain.
    pub async fn close(&self) {
        let (was_subscribed, author_id) = {
            let mut state = self.state.lock().await;
            if state.phase == SessionPhase::Closed {
                return;
            }
            let was_subscribed = state.phase == SessionPhase::Subscribed;
            state.phase = SessionPhase::Closed;
            (was_subscribed, state.author_id.take())
        };

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        if let Some(subscription) = tasks.subscription {
            subscription.cancel();
        }
        for handle in [tasks.keepalive, tasks.heartbeat].into_iter().flatten() {
            handle.abort();
        }

        if let (true, Some(author_id)) = (was_subscribed, author_id) {
            let identity = self.identity_for(&author_id);
            if let Err(e) = self.deps.presence.deregister(&identity).await {
                tracing::warn!(document_id = %self.doc_id, session_id = %self.id, error = ?e, "presence_deregister_failed");
            }
            let last_message_at = self
                .deps
                .presence
                .last_message(&self.doc_id, &self.user.id)
                .await;
            enqueue_after(
                self.deps.jobs.clone(),
                BackgroundJob::SummarizeSession {
                    doc_id: self.doc_id.clone(),
                    user_id: self.user.id.clone(),
                    author_id,
                    last_message_at,
                },
                self.deps.settings.summarize_delay,
            );
        }

        self.audit.close().await;
        if let Some(flusher) = tasks.audit_flusher {
            flusher.abort();
        }
        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!(session_id = %self.id, error = %e, "session_sink_close_failed");
        }
        tracing::info!(document_id = %self.doc_id, session_id = %self.id, "session_closed");
    }
}

fn spawn_keepalive(session: Weak<Session>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(session) = session.upgrade() else {
                break;
            };
            let since_pong = session.last_pong.lock().await.elapsed();
            if since_pong > interval * 3 {
                tracing::warn!(
                    session_id = %session.id,
                    since_pong_ms = since_pong.as_millis() as u64,
                    "session_pong_stale"
                );
            }
            if let Err(e) = session.write_raw(event_frame(EVENT_PING)).await {
                tracing::debug!(session_id = %session.id, error = %e, "session_ping_failed");
                break;
            }
        }
    })
}

fn spawn_presence_heartbeat(
    session: Weak<Session>,
    identity: PresenceIdentity,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(session) = session.upgrade() else {
                break;
            };
            if let Err(e) = session.deps.presence.refresh(&identity).await {
                tracing::warn!(session_id = %session.id, error = ?e, "presence_refresh_failed");
            }
        }
    })
}
