use std::sync::Arc;

use anyhow::Context;

use super::snapshot::SnapshotStore;
use crate::application::ports::delta_log_port::DeltaLogPort;
use crate::domain::documents::delta::DeltaLogEntry;

/// Ordered, append-only record of the ops applied to each document since its latest snapshot.
#[derive(Clone)]
pub struct DeltaLog {
    cache: Arc<dyn DeltaLogPort>,
    snapshots: SnapshotStore,
}

impl DeltaLog {
    pub fn new(cache: Arc<dyn DeltaLogPort>, snapshots: SnapshotStore) -> Self {
        Self { cache, snapshots }
    }

    /// Stores `op` under the next sequence number and returns it.
    ///
    /// A missing counter (new document or evicted key) is seeded from the latest
    /// snapshot so sequences never go backwards.
    pub async fn append(&self, doc_id: &str, op: &str) -> anyhow::Result<i64> {
        if let Some(seq) = self
            .cache
            .append_entry(doc_id, op, None)
            .await
            .context("delta_log_append")?
        {
            return Ok(seq);
        }
        let seed = self
            .snapshots
            .latest_sequence(doc_id)
            .await
            .context("delta_log_seed_lookup")?;
        let seq = self
            .cache
            .append_entry(doc_id, op, Some(seed))
            .await
            .context("delta_log_seeded_append")?
            .ok_or_else(|| anyhow::anyhow!("delta_log_seed_ignored"))?;
        tracing::debug!(document_id = doc_id, seed, seq, "delta_log_counter_seeded");
        Ok(seq)
    }

    pub async fn read(
        &self,
        doc_id: &str,
        low: i64,
        high: Option<i64>,
    ) -> anyhow::Result<Vec<DeltaLogEntry>> {
        let rows = self
            .cache
            .range(doc_id, low, high)
            .await
            .context("delta_log_range")?;
        Ok(rows
            .into_iter()
            .map(|(seq, member)| DeltaLogEntry::from_stored(seq, member))
            .collect())
    }

    /// Replaces the op at `seq` with a tombstone; the entry count is unchanged.
    pub async fn delete(&self, doc_id: &str, seq: i64) -> anyhow::Result<bool> {
        let replaced = self
            .cache
            .tombstone(doc_id, seq)
            .await
            .context("delta_log_tombstone")?;
        if replaced {
            tracing::info!(document_id = doc_id, seq, "delta_log_entry_tombstoned");
        }
        Ok(replaced)
    }

    pub async fn truncate(&self, doc_id: &str, through: i64) -> anyhow::Result<u64> {
        self.cache
            .remove_through(doc_id, through)
            .await
            .context("delta_log_truncate")
    }

    pub async fn size(&self, doc_id: &str) -> anyhow::Result<u64> {
        self.cache.size(doc_id).await.context("delta_log_size")
    }
}
