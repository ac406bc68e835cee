use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use crate::application::ports::presence_port::{PresencePort, PresenceStream};
use crate::infrastructure::realtime::keys;

const CHANNEL_CAPACITY: usize = 1024;

struct Expiring {
    value: String,
    expires_at: Instant,
}

impl Expiring {
    fn live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// Presence and fan-out for a single server process.
///
/// Expiry follows the tokio clock so paused-time tests can drive it.
#[derive(Default)]
pub struct InMemoryPresenceBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    connections: Mutex<HashMap<String, BTreeSet<String>>>,
    values: Mutex<HashMap<String, Expiring>>,
}

impl InMemoryPresenceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels whose subscribers have all gone are dropped on the way.
    async fn sender(&self, doc_id: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(keys::channel_key(doc_id))
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    async fn set_value(&self, key: String, value: String, ttl: Duration) {
        let mut values = self.values.lock().await;
        values.retain(|_, entry| entry.live());
        values.insert(
            key,
            Expiring {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn get_value(&self, key: &str) -> Option<String> {
        let mut values = self.values.lock().await;
        match values.get(key) {
            Some(entry) if entry.live() => Some(entry.value.clone()),
            Some(_) => {
                values.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl PresencePort for InMemoryPresenceBus {
    async fn publish(&self, doc_id: &str, payload: &str) -> anyhow::Result<()> {
        let key = keys::channel_key(doc_id);
        let mut channels = self.channels.lock().await;
        let Some(tx) = channels.get(&key) else {
            return Ok(());
        };
        if tx.send(payload.to_string()).is_err() {
            channels.remove(&key);
        }
        Ok(())
    }

    async fn subscribe(&self, doc_id: &str) -> anyhow::Result<PresenceStream> {
        let rx = self.sender(doc_id).await.subscribe();
        let doc_id = doc_id.to_string();
        Ok(BroadcastStream::new(rx)
            .map(move |item| {
                item.map_err(|e| anyhow::anyhow!("presence channel {doc_id}: {e}"))
            })
            .boxed())
    }

    async fn add_connection(&self, doc_id: &str, member: &str) -> anyhow::Result<()> {
        self.connections
            .lock()
            .await
            .entry(keys::connections_key(doc_id))
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_connection(&self, doc_id: &str, member: &str) -> anyhow::Result<()> {
        let key = keys::connections_key(doc_id);
        let mut connections = self.connections.lock().await;
        if let Some(set) = connections.get_mut(&key) {
            set.remove(member);
            if set.is_empty() {
                connections.remove(&key);
            }
        }
        Ok(())
    }

    async fn connections(&self, doc_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .connections
            .lock()
            .await
            .get(&keys::connections_key(doc_id))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        payload: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.set_value(
            keys::cursor_key(doc_id, user_id, author_id),
            payload.to_string(),
            ttl,
        )
        .await;
        Ok(())
    }

    async fn extend_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let key = keys::cursor_key(doc_id, user_id, author_id);
        let mut values = self.values.lock().await;
        if let Some(entry) = values.get_mut(&key) {
            if entry.live() {
                entry.expires_at = Instant::now() + ttl;
            } else {
                values.remove(&key);
            }
        }
        Ok(())
    }

    async fn get_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .get_value(&keys::cursor_key(doc_id, user_id, author_id))
            .await)
    }

    async fn remove_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
    ) -> anyhow::Result<()> {
        self.values
            .lock()
            .await
            .remove(&keys::cursor_key(doc_id, user_id, author_id));
        Ok(())
    }

    async fn mark_last_message(
        &self,
        doc_id: &str,
        user_id: &str,
        at_unix: i64,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.set_value(
            keys::last_message_key(doc_id, user_id),
            at_unix.to_string(),
            ttl,
        )
        .await;
        Ok(())
    }

    async fn last_message(&self, doc_id: &str, user_id: &str) -> anyhow::Result<Option<i64>> {
        Ok(self
            .get_value(&keys::last_message_key(doc_id, user_id))
            .await
            .and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cursor_expires_after_ttl() {
        let bus = InMemoryPresenceBus::new();
        bus.set_cursor("d", "u", "1", "{}", Duration::from_secs(6))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(bus.get_cursor("d", "u", "1").await.unwrap().is_some());
        bus.extend_cursor("d", "u", "1", Duration::from_secs(6))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(bus.get_cursor("d", "u", "1").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(bus.get_cursor("d", "u", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_receive_published_payloads() {
        let bus = InMemoryPresenceBus::new();
        let mut stream = bus.subscribe("d").await.unwrap();
        bus.publish("d", "hello").await.unwrap();
        bus.publish("other", "ignored").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_documents_leave_nothing_behind() {
        let bus = InMemoryPresenceBus::new();
        let stream = bus.subscribe("d").await.unwrap();
        drop(stream);
        bus.publish("d", "nobody listening").await.unwrap();
        bus.publish("never-opened", "nobody listening").await.unwrap();
        assert!(bus.channels.lock().await.is_empty());

        bus.add_connection("d", "u:1").await.unwrap();
        bus.remove_connection("d", "u:1").await.unwrap();
        assert!(bus.connections.lock().await.is_empty());

        bus.set_cursor("d", "u", "1", "{}", Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        bus.set_cursor("d", "v", "2", "{}", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bus.values.lock().await.len(), 1);
    }
}
