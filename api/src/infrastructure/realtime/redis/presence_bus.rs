use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;

use crate::application::ports::presence_port::{PresencePort, PresenceStream};
use crate::infrastructure::realtime::keys;

/// Presence entries and the per-document pub/sub channel in a shared Redis.
#[derive(Clone)]
pub struct RedisPresenceBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisPresenceBus {
    pub async fn connect(client: redis::Client) -> anyhow::Result<Self> {
        let conn = client
            .get_connection_manager()
            .await
            .context("redis_connection_manager")?;
        Ok(Self { client, conn })
    }

    async fn set_px(&self, key: String, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("redis_set_px {key}"))?;
        Ok(())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl PresencePort for RedisPresenceBus {
    async fn publish(&self, doc_id: &str, payload: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(keys::channel_key(doc_id))
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context("redis_publish")?;
        Ok(())
    }

    async fn subscribe(&self, doc_id: &str) -> anyhow::Result<PresenceStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("redis_get_async_pubsub")?;
        pubsub
            .subscribe(keys::channel_key(doc_id))
            .await
            .context("redis_subscribe")?;
        Ok(pubsub
            .into_on_message()
            .map(|msg| {
                msg.get_payload::<String>()
                    .context("redis_pubsub_payload")
            })
            .boxed())
    }

    async fn add_connection(&self, doc_id: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(keys::connections_key(doc_id))
            .arg(member)
            .query_async(&mut conn)
            .await
            .context("redis_sadd_connection")?;
        Ok(())
    }

    async fn remove_connection(&self, doc_id: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SREM")
            .arg(keys::connections_key(doc_id))
            .arg(member)
            .query_async(&mut conn)
            .await
            .context("redis_srem_connection")?;
        Ok(())
    }

    async fn connections(&self, doc_id: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(keys::connections_key(doc_id))
            .query_async(&mut conn)
            .await
            .context("redis_smembers_connections")?;
        Ok(members)
    }

    async fn set_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        payload: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.set_px(keys::cursor_key(doc_id, user_id, author_id), payload, ttl)
            .await
    }

    async fn extend_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(keys::cursor_key(doc_id, user_id, author_id))
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .context("redis_pexpire_cursor")?;
        Ok(())
    }

    async fn get_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(keys::cursor_key(doc_id, user_id, author_id))
            .query_async(&mut conn)
            .await
            .context("redis_get_cursor")?;
        Ok(value)
    }

    async fn remove_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(keys::cursor_key(doc_id, user_id, author_id))
            .query_async(&mut conn)
            .await
            .context("redis_del_cursor")?;
        Ok(())
    }

    async fn store_and_publish_cursor(
        &self,
        doc_id: &str,
        user_id: &str,
        author_id: &str,
        payload: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(keys::cursor_key(doc_id, user_id, author_id))
            .arg(payload)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .ignore()
            .cmd("PUBLISH")
            .arg(keys::channel_key(doc_id))
            .arg(payload)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("redis_cursor_pipeline")?;
        Ok(())
    }

    async fn mark_last_message(
        &self,
        doc_id: &str,
        user_id: &str,
        at_unix: i64,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.set_px(
            keys::last_message_key(doc_id, user_id),
            &at_unix.to_string(),
            ttl,
        )
        .await
    }

    async fn last_message(&self, doc_id: &str, user_id: &str) -> anyhow::Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(keys::last_message_key(doc_id, user_id))
            .query_async(&mut conn)
            .await
            .context("redis_get_last_message")?;
        Ok(value)
    }
}
