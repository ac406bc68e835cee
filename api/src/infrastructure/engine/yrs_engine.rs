use anyhow::Context;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};

use crate::application::ports::document_engine::{DocumentEngine, DocumentValue};

/// Name of the shared text every client edits.
pub const CONTENT_ROOT: &str = "content";

/// Ops are base64-encoded Yjs v1 updates; snapshots are full-state v1 updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct YrsDocumentEngine;

impl DocumentEngine for YrsDocumentEngine {
    fn empty(&self) -> Box<dyn DocumentValue> {
        Box::new(YrsDocument::new())
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Box<dyn DocumentValue>> {
        let document = YrsDocument::new();
        document.apply_update_bytes(bytes)?;
        Ok(Box::new(document))
    }
}

pub struct YrsDocument {
    doc: Doc,
}

impl YrsDocument {
    pub fn new() -> Self {
        let doc = Doc::new();
        doc.get_or_insert_text(CONTENT_ROOT);
        Self { doc }
    }

    fn apply_update_bytes(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let update = Update::decode_v1(bytes).context("yrs_decode_update")?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update).context("yrs_apply_update")?;
        Ok(())
    }

    fn full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

impl Default for YrsDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentValue for YrsDocument {
    fn merge_op(&mut self, op: &str) -> anyhow::Result<()> {
        let bytes = BASE64.decode(op.trim()).context("yrs_op_base64")?;
        self.apply_update_bytes(&bytes)
    }

    fn snapshot_op(&self) -> anyhow::Result<Value> {
        Ok(json!({
            "type": "snapshot",
            "update": BASE64.encode(self.full_state()),
        }))
    }

    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.full_state())
    }

    fn to_ops(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![BASE64.encode(self.full_state())])
    }

    fn render(&self) -> String {
        let text = self.doc.get_or_insert_text(CONTENT_ROOT);
        let txn = self.doc.transact();
        text.get_string(&txn)
    }
}
