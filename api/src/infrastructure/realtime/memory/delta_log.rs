use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::application::ports::delta_log_port::DeltaLogPort;
use crate::domain::documents::delta::tombstone_marker;

#[derive(Default)]
struct DocLog {
    counter: Option<i64>,
    entries: BTreeMap<i64, String>,
}

/// Single-process delta log; one lock makes every operation atomic.
#[derive(Default)]
pub struct InMemoryDeltaLog {
    docs: Mutex<HashMap<String, DocLog>>,
}

impl DocLog {
    fn top(&self) -> i64 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }
}

impl InMemoryDeltaLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the counter while keeping stored entries, as a cache eviction would.
    pub async fn evict_counter(&self, doc_id: &str) {
        if let Some(log) = self.docs.lock().await.get_mut(doc_id) {
            log.counter = None;
        }
    }
}

#[async_trait]
impl DeltaLogPort for InMemoryDeltaLog {
    async fn append_entry(
        &self,
        doc_id: &str,
        member: &str,
        seed: Option<i64>,
    ) -> anyhow::Result<Option<i64>> {
        let mut docs = self.docs.lock().await;
        let counted = docs.get(doc_id).is_some_and(|log| log.counter.is_some());
        if !counted && seed.is_none() {
            return Ok(None);
        }
        let log = docs.entry(doc_id.to_string()).or_default();
        let floor = log.top().max(seed.unwrap_or(0));
        let counter = log.counter.get_or_insert(floor);
        *counter += 1;
        let seq = *counter;
        log.entries.insert(seq, member.to_string());
        Ok(Some(seq))
    }

    async fn range(
        &self,
        doc_id: &str,
        low: i64,
        high: Option<i64>,
    ) -> anyhow::Result<Vec<(i64, String)>> {
        let docs = self.docs.lock().await;
        let Some(log) = docs.get(doc_id) else {
            return Ok(Vec::new());
        };
        let high = high.unwrap_or(i64::MAX);
        if high < low {
            return Ok(Vec::new());
        }
        Ok(log
            .entries
            .range(low..=high)
            .map(|(seq, member)| (*seq, member.clone()))
            .collect())
    }

    async fn tombstone(&self, doc_id: &str, seq: i64) -> anyhow::Result<bool> {
        let mut docs = self.docs.lock().await;
        let Some(entry) = docs.get_mut(doc_id).and_then(|log| log.entries.get_mut(&seq)) else {
            return Ok(false);
        };
        *entry = tombstone_marker(seq);
        Ok(true)
    }

    async fn remove_through(&self, doc_id: &str, through: i64) -> anyhow::Result<u64> {
        let mut docs = self.docs.lock().await;
        let Some(log) = docs.get_mut(doc_id) else {
            return Ok(0);
        };
        let kept = log.entries.split_off(&through.saturating_add(1));
        let removed = log.entries.len() as u64;
        log.entries = kept;
        if log.counter.is_none() {
            log.counter = Some(log.top().max(through));
        }
        Ok(removed)
    }

    async fn size(&self, doc_id: &str) -> anyhow::Result<u64> {
        let docs = self.docs.lock().await;
        Ok(docs
            .get(doc_id)
            .map(|log| log.entries.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unseeded_append_on_missing_counter_writes_nothing() {
        let log = InMemoryDeltaLog::new();
        assert_eq!(log.append_entry("doc", "a", None).await.unwrap(), None);
        assert_eq!(log.size("doc").await.unwrap(), 0);
        assert_eq!(log.append_entry("doc", "a", Some(0)).await.unwrap(), Some(1));
        assert_eq!(log.append_entry("doc", "b", None).await.unwrap(), Some(2));
        let stored = log.range("doc", 0, None).await.unwrap();
        assert_eq!(stored, vec![(1, "a".to_string()), (2, "b".to_string())]);
    }

    #[tokio::test]
    async fn seeding_respects_highest_stored_entry() {
        let log = InMemoryDeltaLog::new();
        assert_eq!(log.append_entry("doc", "op", Some(11)).await.unwrap(), Some(12));
        log.evict_counter("doc").await;
        assert_eq!(log.append_entry("doc", "op", Some(5)).await.unwrap(), Some(13));
        log.evict_counter("doc").await;
        assert_eq!(log.append_entry("doc", "op", Some(20)).await.unwrap(), Some(21));
    }

    #[tokio::test]
    async fn remove_through_is_inclusive() {
        let log = InMemoryDeltaLog::new();
        for seq in 1..=5 {
            log.append_entry("doc", &format!("op{seq}"), Some(0)).await.unwrap();
        }
        assert_eq!(log.remove_through("doc", 3).await.unwrap(), 3);
        let rest = log.range("doc", 0, None).await.unwrap();
        assert_eq!(rest.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn truncating_without_counter_keeps_a_floor() {
        let log = InMemoryDeltaLog::new();
        for _ in 0..3 {
            log.append_entry("doc", "op", Some(0)).await.unwrap();
        }
        log.evict_counter("doc").await;
        log.remove_through("doc", 3).await.unwrap();
        assert_eq!(log.append_entry("doc", "next", None).await.unwrap(), Some(4));
    }
}
