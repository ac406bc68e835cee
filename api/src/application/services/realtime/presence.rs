use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::application::ports::presence_port::PresencePort;
use crate::application::ports::user_repository::UserRepository;
use crate::domain::documents::cursor::{
    CursorOperation, DELETE_CURSOR, NEW_CURSOR, PresenceIdentity, parse_connection_member,
};

/// Live fan-out subscription; dropping or cancelling it stops delivery.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Tracks who is connected to each document and relays cursor state between them.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    port: Arc<dyn PresencePort>,
    users: Arc<dyn UserRepository>,
    check_interval: Duration,
}

impl PresenceBroadcaster {
    pub fn new(
        port: Arc<dyn PresencePort>,
        users: Arc<dyn UserRepository>,
        check_interval: Duration,
    ) -> Self {
        Self {
            port,
            users,
            check_interval,
        }
    }

    /// Presence entries outlive one missed refresh by a second.
    pub fn ttl(&self) -> Duration {
        self.check_interval + Duration::from_secs(1)
    }

    pub fn refresh_interval(&self) -> Duration {
        self.check_interval
            .checked_sub(Duration::from_secs(1))
            .filter(|d| !d.is_zero())
            .unwrap_or(self.check_interval)
    }

    pub async fn publish(&self, doc_id: &str, payload: &str) -> anyhow::Result<()> {
        self.port
            .publish(doc_id, payload)
            .await
            .context("presence_publish")
    }

    /// Delivers every payload published for `doc_id` to `on_message`, in publish order.
    pub async fn subscribe<F, Fut>(
        &self,
        doc_id: &str,
        mut on_message: F,
    ) -> anyhow::Result<SubscriptionHandle>
    where
        F: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stream = self
            .port
            .subscribe(doc_id)
            .await
            .context("presence_subscribe")?;
        let doc_id = doc_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(payload) => on_message(payload).await,
                    Err(e) => {
                        tracing::warn!(document_id = %doc_id, error = ?e, "presence_stream_error");
                    }
                }
            }
            tracing::debug!(document_id = %doc_id, "presence_stream_ended");
        });
        Ok(SubscriptionHandle { task })
    }

    /// Adds the session to the document's connection set and announces it.
    pub async fn register(&self, identity: &PresenceIdentity) -> anyhow::Result<()> {
        let op = identity.cursor(NEW_CURSOR);
        let payload = serde_json::to_string(&op).context("presence_encode_cursor")?;
        self.port
            .store_and_publish_cursor(
                &identity.doc_id,
                &identity.user_id,
                &identity.author_id,
                &payload,
                self.ttl(),
            )
            .await
            .context("presence_register_cursor")?;
        self.port
            .add_connection(&identity.doc_id, &identity.connection_member())
            .await
            .context("presence_register_connection")?;
        Ok(())
    }

    pub async fn refresh(&self, identity: &PresenceIdentity) -> anyhow::Result<()> {
        self.port
            .extend_cursor(
                &identity.doc_id,
                &identity.user_id,
                &identity.author_id,
                self.ttl(),
            )
            .await
            .context("presence_refresh")
    }

    /// Stamps a client cursor frame with the session identity, stores it and publishes it.
    pub async fn publish_cursor(
        &self,
        identity: &PresenceIdentity,
        mut op: CursorOperation,
    ) -> anyhow::Result<CursorOperation> {
        identity.stamp(&mut op);
        let payload = serde_json::to_string(&op).context("presence_encode_cursor")?;
        self.port
            .store_and_publish_cursor(
                &identity.doc_id,
                &identity.user_id,
                &identity.author_id,
                &payload,
                self.ttl(),
            )
            .await
            .context("presence_publish_cursor")?;
        Ok(op)
    }

    /// Removes the session's presence and tells peers; every step is attempted.
    pub async fn deregister(&self, identity: &PresenceIdentity) -> anyhow::Result<()> {
        let removed_member = self
            .port
            .remove_connection(&identity.doc_id, &identity.connection_member())
            .await
            .context("presence_remove_connection");
        let removed_cursor = self
            .port
            .remove_cursor(&identity.doc_id, &identity.user_id, &identity.author_id)
            .await
            .context("presence_remove_cursor");
        let payload = serde_json::to_string(&identity.cursor(DELETE_CURSOR))
            .context("presence_encode_cursor")?;
        let published = self.publish(&identity.doc_id, &payload).await;
        removed_member?;
        removed_cursor?;
        published
    }

    /// Cursor state of every live collaborator, stamped as `newCursor`.
    ///
    /// Members whose user or presence entry no longer exists are purged on the way.
    pub async fn current_cursors(&self, doc_id: &str) -> anyhow::Result<Vec<CursorOperation>> {
        let members = self
            .port
            .connections(doc_id)
            .await
            .context("presence_connections")?;

        let mut parsed = Vec::with_capacity(members.len());
        let mut user_ids = Vec::new();
        let mut seen_users = HashSet::new();
        for member in &members {
            match parse_connection_member(member) {
                Some((user_id, author_id)) => {
                    if seen_users.insert(user_id.to_string()) {
                        user_ids.push(user_id.to_string());
                    }
                    parsed.push((member.as_str(), user_id, author_id));
                }
                None => {
                    tracing::warn!(document_id = doc_id, member = %member, "presence_malformed_member");
                    self.purge(doc_id, member).await;
                }
            }
        }
        if parsed.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = self
            .users
            .find_profiles(&user_ids)
            .await
            .context("presence_find_profiles")?;

        let mut cursors = Vec::with_capacity(parsed.len());
        for (member, user_id, author_id) in parsed {
            let Some(profile) = profiles.get(user_id) else {
                tracing::warn!(document_id = doc_id, user_id, "presence_user_missing");
                self.purge(doc_id, member).await;
                continue;
            };
            let raw = match self.port.get_cursor(doc_id, user_id, author_id).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    tracing::debug!(document_id = doc_id, user_id, author_id, "presence_expired");
                    self.purge(doc_id, member).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(document_id = doc_id, user_id, error = ?e, "presence_get_cursor_failed");
                    continue;
                }
            };
            let mut op: CursorOperation = match serde_json::from_str(&raw) {
                Ok(op) => op,
                Err(e) => {
                    tracing::error!(document_id = doc_id, user_id, error = ?e, "presence_cursor_decode_failed");
                    continue;
                }
            };
            op.kind = NEW_CURSOR.to_string();
            op.user_id = user_id.to_string();
            op.author_id = author_id.to_string();
            op.name = profile.name.clone();
            op.color = profile.highlight_color.clone();
            cursors.push(op);
        }
        Ok(cursors)
    }

    pub async fn mark_last_message(&self, doc_id: &str, user_id: &str, at_unix: i64) {
        if let Err(e) = self
            .port
            .mark_last_message(doc_id, user_id, at_unix, Duration::from_secs(60))
            .await
        {
            tracing::debug!(document_id = doc_id, user_id, error = ?e, "presence_mark_message_failed");
        }
    }

    pub async fn last_message(&self, doc_id: &str, user_id: &str) -> Option<i64> {
        match self.port.last_message(doc_id, user_id).await {
            Ok(at) => at,
            Err(e) => {
                tracing::debug!(document_id = doc_id, user_id, error = ?e, "presence_last_message_failed");
                None
            }
        }
    }

    async fn purge(&self, doc_id: &str, member: &str) {
        if let Err(e) = self.port.remove_connection(doc_id, member).await {
            tracing::warn!(document_id = doc_id, member, error = ?e, "presence_purge_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::realtime::memory::InMemoryPresenceBus;
    use crate::test_support::InMemoryDirectory;

    fn identity(user_id: &str, author_id: &str) -> PresenceIdentity {
        PresenceIdentity {
            doc_id: "doc".into(),
            user_id: user_id.into(),
            author_id: author_id.into(),
            name: format!("name-{user_id}"),
            color: "#123456".into(),
        }
    }

    fn broadcaster() -> (PresenceBroadcaster, Arc<InMemoryPresenceBus>, Arc<InMemoryDirectory>) {
        let bus = Arc::new(InMemoryPresenceBus::new());
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user("u1", "Ada", "#ff0000");
        directory.add_user("u2", "Grace", "#00ff00");
        let presence = PresenceBroadcaster::new(bus.clone(), directory.clone(), Duration::from_secs(5));
        (presence, bus, directory)
    }

    #[tokio::test]
    async fn registered_sessions_are_listed_with_profile() {
        let (presence, _, _) = broadcaster();
        presence.register(&identity("u1", "1")).await.unwrap();

        let cursors = presence.current_cursors("doc").await.unwrap();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].kind, NEW_CURSOR);
        assert_eq!(cursors[0].name, "Ada");
        assert_eq!(cursors[0].color, "#ff0000");
        assert_eq!(cursors[0].author_id, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn presence_expires_without_refresh() {
        let (presence, bus, _) = broadcaster();
        let alive = identity("u1", "1");
        let stale = identity("u2", "2");
        presence.register(&alive).await.unwrap();
        presence.register(&stale).await.unwrap();

        for _ in 0..3 {
            tokio::time::advance(presence.refresh_interval()).await;
            presence.refresh(&alive).await.unwrap();
        }

        let cursors = presence.current_cursors("doc").await.unwrap();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].user_id, "u1");
        assert_eq!(bus.connections("doc").await.unwrap(), vec!["u1:1".to_string()]);
    }

    #[tokio::test]
    async fn deleted_user_is_purged() {
        let (presence, bus, directory) = broadcaster();
        presence.register(&identity("u2", "2")).await.unwrap();
        directory.remove_user("u2");

        assert!(presence.current_cursors("doc").await.unwrap().is_empty());
        assert!(bus.connections("doc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cursor_updates_reach_subscribers_stamped() {
        let (presence, _, _) = broadcaster();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = presence
            .subscribe("doc", move |payload| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(payload);
                }
            })
            .await
            .unwrap();

        let raw: CursorOperation =
            serde_json::from_str(r#"{"type":"cursor","userID":"x","range":{"index":2}}"#).unwrap();
        presence
            .publish_cursor(&identity("u1", "1"), raw)
            .await
            .unwrap();
        let op: CursorOperation = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(op.user_id, "u1");
        assert_eq!(op.name, "name-u1");
        assert_eq!(op.range, Some(serde_json::json!({"index": 2})));

        handle.cancel();
    }

    #[tokio::test]
    async fn deregister_announces_departure() {
        let (presence, bus, _) = broadcaster();
        let who = identity("u1", "1");
        presence.register(&who).await.unwrap();
        let mut stream = bus.subscribe("doc").await.unwrap();

        presence.deregister(&who).await.unwrap();
        let op: CursorOperation =
            serde_json::from_str(&stream.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(op.kind, DELETE_CURSOR);
        assert!(bus.connections("doc").await.unwrap().is_empty());
        assert!(presence.current_cursors("doc").await.unwrap().is_empty());
    }
}
