use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::task;

use crate::application::ports::document_engine::{DocumentEngine, DocumentValue};
use crate::application::ports::object_store_port::ObjectStorePort;
use crate::domain::documents::snapshot::{sequence_from_key, snapshot_key, snapshot_prefix};

const SNAPSHOT_CONTENT_TYPE: &str = "application/octet-stream";

/// Immutable snapshots in object storage, newest first by key.
#[derive(Clone)]
pub struct SnapshotStore {
    objects: Arc<dyn ObjectStorePort>,
    engine: Arc<dyn DocumentEngine>,
    root: String,
}

pub struct LoadedSnapshot {
    /// Sequence the snapshot covers; 0 when the document has none.
    pub seq: i64,
    pub document: Box<dyn DocumentValue>,
}

impl SnapshotStore {
    pub fn new(
        objects: Arc<dyn ObjectStorePort>,
        engine: Arc<dyn DocumentEngine>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            engine,
            root: root.into(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn DocumentEngine> {
        &self.engine
    }

    pub async fn save(
        &self,
        doc_id: &str,
        seq: i64,
        document: &dyn DocumentValue,
    ) -> anyhow::Result<String> {
        let bytes = document.encode().context("snapshot_encode")?;
        let key = snapshot_key(&self.root, doc_id, seq);
        let size = bytes.len();
        self.objects
            .put_object(&key, SNAPSHOT_CONTENT_TYPE, bytes)
            .await
            .context("snapshot_put")?;
        tracing::info!(document_id = doc_id, seq, key = %key, size, "snapshot_saved");
        Ok(key)
    }

    pub async fn latest_key(&self, doc_id: &str) -> anyhow::Result<Option<String>> {
        self.objects
            .list_first(&snapshot_prefix(&self.root, doc_id))
            .await
            .context("snapshot_list_first")
    }

    pub async fn latest_sequence(&self, doc_id: &str) -> anyhow::Result<i64> {
        match self.latest_key(doc_id).await? {
            Some(key) => sequence_from_key(&key),
            None => Ok(0),
        }
    }

    pub async fn load_latest(&self, doc_id: &str) -> anyhow::Result<LoadedSnapshot> {
        let Some(key) = self.latest_key(doc_id).await? else {
            return Ok(LoadedSnapshot {
                seq: 0,
                document: self.engine.empty(),
            });
        };
        let seq = sequence_from_key(&key)?;
        let bytes = self
            .objects
            .get_object(&key)
            .await
            .context("snapshot_get")?
            .ok_or_else(|| anyhow!("snapshot {key} listed but missing"))?;
        let engine = self.engine.clone();
        let document = task::spawn_blocking(move || engine.decode(&bytes))
            .await
            .context("snapshot_decode_join")?
            .with_context(|| format!("snapshot_decode {key}"))?;
        Ok(LoadedSnapshot { seq, document })
    }
}
