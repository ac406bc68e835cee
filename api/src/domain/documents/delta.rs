use serde::Serialize;

/// Prefix of the placeholder stored in place of a deleted operation.
pub const TOMBSTONE_PREFIX: &str = "deleted-";

pub fn tombstone_marker(seq: i64) -> String {
    format!("{TOMBSTONE_PREFIX}{seq}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum DeltaPayload {
    Live(String),
    Deleted(i64),
}

/// One entry of a document's delta log, keyed by its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaLogEntry {
    pub seq: i64,
    pub payload: DeltaPayload,
}

impl DeltaLogEntry {
    pub fn live(seq: i64, op: impl Into<String>) -> Self {
        Self {
            seq,
            payload: DeltaPayload::Live(op.into()),
        }
    }

    /// Rebuilds an entry from the member stored under `seq`.
    pub fn from_stored(seq: i64, member: String) -> Self {
        match member.strip_prefix(TOMBSTONE_PREFIX) {
            Some(rest) => Self {
                seq,
                payload: DeltaPayload::Deleted(rest.parse().unwrap_or(seq)),
            },
            None => Self::live(seq, member),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.payload, DeltaPayload::Deleted(_))
    }

    pub fn live_op(&self) -> Option<&str> {
        match &self.payload {
            DeltaPayload::Live(op) => Some(op.as_str()),
            DeltaPayload::Deleted(_) => None,
        }
    }
}
