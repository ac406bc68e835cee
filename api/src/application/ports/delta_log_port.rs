use async_trait::async_trait;

/// Cache-side storage behind the delta log.
///
/// Each method must be atomic on the backing store; concurrent callers on
/// different server instances rely on it for sequence uniqueness.
#[async_trait]
pub trait DeltaLogPort: Send + Sync {
    /// Assigns the next sequence number to `member` and stores it in one atomic step.
    ///
    /// A missing counter is initialized to the larger of `seed` and the highest
    /// stored sequence before incrementing. Without a seed a missing counter
    /// leaves the log untouched and `None` is returned.
    async fn append_entry(
        &self,
        doc_id: &str,
        member: &str,
        seed: Option<i64>,
    ) -> anyhow::Result<Option<i64>>;

    /// Entries with `low <= seq <= high` (unbounded when `high` is `None`), ascending.
    async fn range(
        &self,
        doc_id: &str,
        low: i64,
        high: Option<i64>,
    ) -> anyhow::Result<Vec<(i64, String)>>;

    /// Replaces the entry at `seq` with a tombstone. Returns false when nothing is stored there.
    async fn tombstone(&self, doc_id: &str, seq: i64) -> anyhow::Result<bool>;

    /// Removes every entry with `seq <= through`; returns how many were removed.
    /// A missing counter is set to the larger of `through` and the highest remaining sequence.
    async fn remove_through(&self, doc_id: &str, through: i64) -> anyhow::Result<u64>;

    async fn size(&self, doc_id: &str) -> anyhow::Result<u64>;
}
