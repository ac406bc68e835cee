use anyhow::Context;

use super::delta_log::DeltaLog;
use super::snapshot::SnapshotStore;
use crate::application::ports::document_engine::DocumentValue;
use crate::domain::documents::delta::DeltaPayload;

pub struct AssembledDocument {
    /// Highest sequence actually merged into `document`.
    pub sequence: i64,
    /// Highest sequence examined, including tombstones and ops that failed to merge.
    pub covered_through: i64,
    pub snapshot_sequence: i64,
    pub skipped: usize,
    pub document: Box<dyn DocumentValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub sequence: i64,
    pub saved: bool,
    pub truncated: u64,
}

/// Rebuilds current document state from the latest snapshot plus pending deltas.
#[derive(Clone)]
pub struct DocumentAssembler {
    snapshots: SnapshotStore,
    delta_log: DeltaLog,
}

impl DocumentAssembler {
    pub fn new(snapshots: SnapshotStore, delta_log: DeltaLog) -> Self {
        Self {
            snapshots,
            delta_log,
        }
    }

    pub fn delta_log(&self) -> &DeltaLog {
        &self.delta_log
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub async fn assemble(&self, doc_id: &str) -> anyhow::Result<AssembledDocument> {
        let loaded = self
            .snapshots
            .load_latest(doc_id)
            .await
            .context("assemble_load_snapshot")?;
        let mut document = loaded.document;
        let entries = self
            .delta_log
            .read(doc_id, loaded.seq + 1, None)
            .await
            .context("assemble_read_deltas")?;

        let mut sequence = loaded.seq;
        let mut covered_through = loaded.seq;
        let mut skipped = 0usize;
        for entry in entries {
            covered_through = covered_through.max(entry.seq);
            match &entry.payload {
                DeltaPayload::Deleted(_) => skipped += 1,
                DeltaPayload::Live(op) => match document.merge_op(op) {
                    Ok(()) => sequence = entry.seq,
                    Err(e) => {
                        skipped += 1;
                        tracing::warn!(
                            document_id = doc_id,
                            seq = entry.seq,
                            error = ?e,
                            "delta_log_merge_failed"
                        );
                    }
                },
            }
        }

        Ok(AssembledDocument {
            sequence,
            covered_through,
            snapshot_sequence: loaded.seq,
            skipped,
            document,
        })
    }

    /// Folds pending deltas into a new snapshot, then truncates the covered range.
    ///
    /// The snapshot is written before anything is removed, so a crash in between
    /// only leaves already-covered entries behind.
    pub async fn checkpoint(&self, doc_id: &str) -> anyhow::Result<CheckpointOutcome> {
        let assembled = self.assemble(doc_id).await?;
        if assembled.covered_through == assembled.snapshot_sequence {
            tracing::debug!(document_id = doc_id, "checkpoint_nothing_pending");
            return Ok(CheckpointOutcome {
                sequence: assembled.snapshot_sequence,
                saved: false,
                truncated: 0,
            });
        }
        self.snapshots
            .save(doc_id, assembled.covered_through, assembled.document.as_ref())
            .await
            .context("checkpoint_save")?;
        let truncated = self
            .delta_log
            .truncate(doc_id, assembled.covered_through)
            .await
            .context("checkpoint_truncate")?;
        tracing::info!(
            document_id = doc_id,
            seq = assembled.covered_through,
            merged_through = assembled.sequence,
            truncated,
            skipped = assembled.skipped,
            "checkpoint_completed"
        );
        Ok(CheckpointOutcome {
            sequence: assembled.covered_through,
            saved: true,
            truncated,
        })
    }

    /// Replaces the state of `target_id` with a fresh copy of `source_id`.
    ///
    /// The copy is rebuilt from the source's ops into an empty document and stored
    /// at or above every sequence the target has already used, so it becomes the
    /// target's latest snapshot. Pending target deltas are dropped.
    pub async fn duplicate(&self, source_id: &str, target_id: &str) -> anyhow::Result<i64> {
        let source = self.assemble(source_id).await?;
        let mut copy = self.snapshots.engine().empty();
        for op in source.document.to_ops().context("duplicate_source_ops")? {
            copy.merge_op(&op).context("duplicate_merge")?;
        }

        let target = self.assemble(target_id).await.context("duplicate_target_state")?;
        let seq = source.covered_through.max(target.covered_through);
        self.snapshots
            .save(target_id, seq, copy.as_ref())
            .await
            .context("duplicate_save")?;
        self.delta_log
            .truncate(target_id, seq)
            .await
            .context("duplicate_truncate")?;
        tracing::info!(
            source_document_id = source_id,
            target_document_id = target_id,
            source_seq = source.covered_through,
            seq,
            "document_duplicated"
        );
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::{Mutex, Notify, oneshot};

    use super::*;
    use crate::application::ports::delta_log_port::DeltaLogPort;
    use crate::infrastructure::realtime::memory::InMemoryDeltaLog;
    use crate::test_support::{ClientDoc, MemoryObjectStore, engine};

    fn assembler_over(cache: Arc<dyn DeltaLogPort>) -> DocumentAssembler {
        let snapshots = SnapshotStore::new(Arc::new(MemoryObjectStore::new()), engine(), "v3");
        let delta_log = DeltaLog::new(cache, snapshots.clone());
        DocumentAssembler::new(snapshots, delta_log)
    }

    fn assembler() -> DocumentAssembler {
        assembler_over(Arc::new(InMemoryDeltaLog::new()))
    }

    /// Holds the first append until released, as a slow network round trip would.
    struct GatedDeltaLog {
        inner: InMemoryDeltaLog,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        entered: Notify,
    }

    #[async_trait]
    impl DeltaLogPort for GatedDeltaLog {
        async fn append_entry(
            &self,
            doc_id: &str,
            member: &str,
            seed: Option<i64>,
        ) -> anyhow::Result<Option<i64>> {
            let gate = self.gate.lock().await.take();
            if let Some(release) = gate {
                self.entered.notify_one();
                let _ = release.await;
            }
            self.inner.append_entry(doc_id, member, seed).await
        }

        async fn range(
            &self,
            doc_id: &str,
            low: i64,
            high: Option<i64>,
        ) -> anyhow::Result<Vec<(i64, String)>> {
            self.inner.range(doc_id, low, high).await
        }

        async fn tombstone(&self, doc_id: &str, seq: i64) -> anyhow::Result<bool> {
            self.inner.tombstone(doc_id, seq).await
        }

        async fn remove_through(&self, doc_id: &str, through: i64) -> anyhow::Result<u64> {
            self.inner.remove_through(doc_id, through).await
        }

        async fn size(&self, doc_id: &str) -> anyhow::Result<u64> {
            self.inner.size(doc_id).await
        }
    }

    async fn append_all(assembler: &DocumentAssembler, doc_id: &str, ops: &[String]) {
        for op in ops {
            assembler.delta_log().append(doc_id, op).await.unwrap();
        }
    }

    #[tokio::test]
    async fn concurrent_clients_converge_in_any_order() {
        let alice = ClientDoc::new();
        let bob = ClientDoc::new();
        let alice_ops = alice.type_text(0, "hello, world!");
        let bob_ops = bob.type_text(0, "goodbye, moon!");

        let assembler = assembler();

        let sequential: Vec<String> = alice_ops.iter().chain(bob_ops.iter()).cloned().collect();
        append_all(&assembler, "sequential", &sequential).await;

        let mut interleaved = Vec::new();
        for i in 0..alice_ops.len().max(bob_ops.len()) {
            if let Some(op) = bob_ops.get(i) {
                interleaved.push(op.clone());
            }
            if let Some(op) = alice_ops.get(i) {
                interleaved.push(op.clone());
            }
        }
        append_all(&assembler, "interleaved", &interleaved).await;

        let a = assembler.assemble("sequential").await.unwrap();
        let b = assembler.assemble("interleaved").await.unwrap();
        assert_eq!(a.sequence, 27);
        assert_eq!(assembler.delta_log().size("sequential").await.unwrap(), 27);
        assert_eq!(a.document.render(), b.document.render());
        assert!(a.document.render().contains("hello, world!"));
        assert!(a.document.render().contains("goodbye, moon!"));
    }

    #[tokio::test]
    async fn checkpoint_preserves_rendering_and_empties_log() {
        let assembler = assembler();
        let client = ClientDoc::new();
        append_all(&assembler, "doc", &client.type_text(0, "abc")).await;

        let before = assembler.assemble("doc").await.unwrap().document.render();
        let outcome = assembler.checkpoint("doc").await.unwrap();
        assert!(outcome.saved);
        assert_eq!(outcome.sequence, 3);
        assert_eq!(outcome.truncated, 3);
        assert_eq!(assembler.delta_log().size("doc").await.unwrap(), 0);

        let after = assembler.assemble("doc").await.unwrap();
        assert_eq!(after.document.render(), before);
        assert_eq!(after.snapshot_sequence, 3);

        assert_eq!(assembler.delta_log().append("doc", &client.insert(3, "d")).await.unwrap(), 4);
        assert_eq!(assembler.assemble("doc").await.unwrap().document.render(), "abcd");
    }

    #[tokio::test]
    async fn checkpoint_without_pending_deltas_is_a_no_op() {
        let assembler = assembler();
        let outcome = assembler.checkpoint("doc").await.unwrap();
        assert!(!outcome.saved);
        assert_eq!(assembler.snapshots().latest_key("doc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unmergeable_op_is_skipped() {
        let assembler = assembler();
        let client = ClientDoc::new();
        let ops = client.type_text(0, "ok");
        assembler.delta_log().append("doc", &ops[0]).await.unwrap();
        assembler.delta_log().append("doc", "not base64 !!!").await.unwrap();
        assembler.delta_log().append("doc", &ops[1]).await.unwrap();

        let assembled = assembler.assemble("doc").await.unwrap();
        assert_eq!(assembled.document.render(), "ok");
        assert_eq!(assembled.skipped, 1);
        assert_eq!(assembled.sequence, 3);

        let outcome = assembler.checkpoint("doc").await.unwrap();
        assert_eq!(outcome.truncated, 3);
    }

    #[tokio::test]
    async fn tombstoned_op_is_excluded_but_counted() {
        let assembler = assembler();
        let client = ClientDoc::new();
        let keep = client.insert(0, "keep");
        let drop = ClientDoc::new().insert(0, "drop");
        assembler.delta_log().append("doc", &keep).await.unwrap();
        assembler.delta_log().append("doc", &drop).await.unwrap();

        assembler.delta_log().delete("doc", 2).await.unwrap();
        assert_eq!(assembler.delta_log().size("doc").await.unwrap(), 2);

        let assembled = assembler.assemble("doc").await.unwrap();
        assert_eq!(assembled.document.render(), "keep");
        assert_eq!(assembled.sequence, 1);
        assert_eq!(assembled.covered_through, 2);

        let outcome = assembler.checkpoint("doc").await.unwrap();
        assert_eq!(outcome.sequence, 2);
        assert_eq!(assembler.delta_log().append("doc", &client.insert(4, "!")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn duplicate_copies_state_at_source_sequence() {
        let assembler = assembler();
        let client = ClientDoc::new();
        append_all(&assembler, "src", &client.type_text(0, "copy me")).await;

        let seq = assembler.duplicate("src", "dst").await.unwrap();
        assert_eq!(seq, 7);
        let copy = assembler.assemble("dst").await.unwrap();
        assert_eq!(copy.document.render(), "copy me");
        assert_eq!(assembler.delta_log().size("dst").await.unwrap(), 0);
        assert_eq!(assembler.delta_log().append("dst", &client.insert(7, ".")).await.unwrap(), 8);
        assert_eq!(assembler.assemble("src").await.unwrap().document.render(), "copy me");
    }

    #[tokio::test]
    async fn slow_append_lands_above_a_concurrent_checkpoint() {
        let (release, gate) = oneshot::channel();
        let cache = Arc::new(GatedDeltaLog {
            inner: InMemoryDeltaLog::new(),
            gate: Mutex::new(Some(gate)),
            entered: Notify::new(),
        });
        let assembler = assembler_over(cache.clone());
        let op_a = ClientDoc::new().insert(0, "A");
        let op_b = ClientDoc::new().insert(0, "B");

        let slow = {
            let assembler = assembler.clone();
            tokio::spawn(async move { assembler.delta_log().append("doc", &op_a).await.unwrap() })
        };
        cache.entered.notified().await;

        assert_eq!(assembler.delta_log().append("doc", &op_b).await.unwrap(), 1);
        let outcome = assembler.checkpoint("doc").await.unwrap();
        assert_eq!(outcome.sequence, 1);

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), 2);

        let rendered = assembler.assemble("doc").await.unwrap().document.render();
        assert!(rendered.contains('A'), "rendered {rendered:?}");
        assert!(rendered.contains('B'), "rendered {rendered:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn appends_racing_checkpoints_are_never_lost() {
        let assembler = assembler();
        let letters: Vec<char> = ('a'..='z').collect();

        let checkpoints = {
            let assembler = assembler.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    assembler.checkpoint("doc").await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let mut appends = Vec::new();
        for c in letters.iter().copied() {
            let assembler = assembler.clone();
            appends.push(tokio::spawn(async move {
                let op = ClientDoc::new().insert(0, &c.to_string());
                assembler.delta_log().append("doc", &op).await.unwrap()
            }));
        }
        let mut seqs = Vec::new();
        for handle in appends {
            seqs.push(handle.await.unwrap());
        }
        checkpoints.await.unwrap();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=26).collect::<Vec<i64>>());

        assembler.checkpoint("doc").await.unwrap();
        let mut rendered: Vec<char> = assembler
            .assemble("doc")
            .await
            .unwrap()
            .document
            .render()
            .chars()
            .collect();
        rendered.sort_unstable();
        assert_eq!(rendered, letters);
    }

    #[tokio::test]
    async fn duplicate_onto_target_with_newer_history_becomes_latest() {
        let assembler = assembler();
        let source = ClientDoc::new();
        append_all(&assembler, "src", &source.type_text(0, "copy me")).await;

        let target = ClientDoc::new();
        append_all(&assembler, "dst", &target.type_text(0, "old text!")).await;
        assembler.checkpoint("dst").await.unwrap();
        assembler.delta_log().append("dst", &target.insert(9, "?")).await.unwrap();

        let seq = assembler.duplicate("src", "dst").await.unwrap();
        assert_eq!(seq, 10);
        assert_eq!(assembler.snapshots().latest_sequence("dst").await.unwrap(), 10);
        assert_eq!(assembler.delta_log().size("dst").await.unwrap(), 0);
        assert_eq!(assembler.assemble("dst").await.unwrap().document.render(), "copy me");

        let next = source.insert(7, ".");
        assert_eq!(assembler.delta_log().append("dst", &next).await.unwrap(), 11);
        assert_eq!(assembler.assemble("dst").await.unwrap().document.render(), "copy me.");
    }
}
