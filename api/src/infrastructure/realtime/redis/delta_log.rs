use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::Script;
use redis::aio::ConnectionManager;

use crate::application::ports::delta_log_port::DeltaLogPort;
use crate::domain::documents::delta::tombstone_marker;
use crate::infrastructure::realtime::keys;

// KEYS[1] counter, KEYS[2] events; ARGV[1] member, ARGV[2] optional seed
static APPEND: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
  if ARGV[2] == nil then
    return false
  end
  local seed = tonumber(ARGV[2])
  local top = redis.call("ZREVRANGE", KEYS[2], 0, 0, "WITHSCORES")
  if top[2] ~= nil and tonumber(top[2]) > seed then
    seed = tonumber(top[2])
  end
  redis.call("SET", KEYS[1], string.format("%d", seed))
end
local seq = redis.call("INCR", KEYS[1])
redis.call("ZADD", KEYS[2], seq, ARGV[1])
return seq
"#,
    )
});

// KEYS[1] counter, KEYS[2] events; ARGV[1] through
static REMOVE_THROUGH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local removed = redis.call("ZREMRANGEBYSCORE", KEYS[2], "-inf", ARGV[1])
if redis.call("EXISTS", KEYS[1]) == 0 then
  local floor = tonumber(ARGV[1])
  local top = redis.call("ZREVRANGE", KEYS[2], 0, 0, "WITHSCORES")
  if top[2] ~= nil and tonumber(top[2]) > floor then
    floor = tonumber(top[2])
  end
  redis.call("SET", KEYS[1], string.format("%d", floor))
end
return removed
"#,
    )
});

// KEYS[1] events; ARGV[1] seq, ARGV[2] tombstone member
static TOMBSTONE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local found = redis.call("ZRANGEBYSCORE", KEYS[1], ARGV[1], ARGV[1])
if #found == 0 then
  return 0
end
redis.call("ZREMRANGEBYSCORE", KEYS[1], ARGV[1], ARGV[1])
redis.call("ZADD", KEYS[1], ARGV[1], ARGV[2])
return 1
"#,
    )
});

/// Delta log stored as a sorted set (`doc:<id>:events`) plus a counter (`doc:<id>:counter`).
#[derive(Clone)]
pub struct RedisDeltaLog {
    conn: ConnectionManager,
}

impl RedisDeltaLog {
    pub async fn connect(client: redis::Client) -> anyhow::Result<Self> {
        let conn = client
            .get_connection_manager()
            .await
            .context("redis_connection_manager")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DeltaLogPort for RedisDeltaLog {
    async fn append_entry(
        &self,
        doc_id: &str,
        member: &str,
        seed: Option<i64>,
    ) -> anyhow::Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let mut invocation = APPEND.prepare_invoke();
        invocation
            .key(keys::counter_key(doc_id))
            .key(keys::events_key(doc_id))
            .arg(member);
        if let Some(seed) = seed {
            invocation.arg(seed);
        }
        let seq: Option<i64> = invocation
            .invoke_async(&mut conn)
            .await
            .context("redis_delta_append")?;
        Ok(seq)
    }

    async fn range(
        &self,
        doc_id: &str,
        low: i64,
        high: Option<i64>,
    ) -> anyhow::Result<Vec<(i64, String)>> {
        let mut conn = self.conn.clone();
        let max = high
            .map(|h| h.to_string())
            .unwrap_or_else(|| "+inf".to_string());
        let rows: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(keys::events_key(doc_id))
            .arg(low)
            .arg(max)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .context("redis_zrangebyscore_delta")?;
        Ok(rows
            .into_iter()
            .map(|(member, score)| (score as i64, member))
            .collect())
    }

    async fn tombstone(&self, doc_id: &str, seq: i64) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let replaced: i64 = TOMBSTONE
            .key(keys::events_key(doc_id))
            .arg(seq)
            .arg(tombstone_marker(seq))
            .invoke_async(&mut conn)
            .await
            .context("redis_delta_tombstone")?;
        Ok(replaced == 1)
    }

    async fn remove_through(&self, doc_id: &str, through: i64) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = REMOVE_THROUGH
            .key(keys::counter_key(doc_id))
            .key(keys::events_key(doc_id))
            .arg(through)
            .invoke_async(&mut conn)
            .await
            .context("redis_delta_remove_through")?;
        Ok(removed)
    }

    async fn size(&self, doc_id: &str) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("ZCARD")
            .arg(keys::events_key(doc_id))
            .query_async(&mut conn)
            .await
            .context("redis_zcard_delta")?;
        Ok(size)
    }
}
