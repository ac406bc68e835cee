use serde_json::Value;

/// A mergeable document value.
///
/// Merging the same set of ops in any order must converge to the same value.
pub trait DocumentValue: Send + Sync {
    fn merge_op(&mut self, op: &str) -> anyhow::Result<()>;
    /// Frame that, applied by a client, reproduces this value.
    fn snapshot_op(&self) -> anyhow::Result<Value>;
    fn encode(&self) -> anyhow::Result<Vec<u8>>;
    /// Ops that rebuild this value from empty.
    fn to_ops(&self) -> anyhow::Result<Vec<String>>;
    fn render(&self) -> String;
}

pub trait DocumentEngine: Send + Sync {
    fn empty(&self) -> Box<dyn DocumentValue>;
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Box<dyn DocumentValue>>;
}
