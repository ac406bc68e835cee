use anyhow::{Context, bail};

/// Snapshot keys store `MAX_SEQ - seq` so that a lexicographic listing yields the newest first.
pub const MAX_SEQ: i64 = 9_999_999_999_999_999;

const KEY_DIGITS: usize = 16;

pub fn snapshot_prefix(root: &str, doc_id: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        format!("{doc_id}/snapshots/")
    } else {
        format!("{root}/{doc_id}/snapshots/")
    }
}

pub fn snapshot_key(root: &str, doc_id: &str, seq: i64) -> String {
    format!(
        "{}{:0width$}",
        snapshot_prefix(root, doc_id),
        MAX_SEQ - seq,
        width = KEY_DIGITS
    )
}

pub fn sequence_from_key(key: &str) -> anyhow::Result<i64> {
    let name = key.rsplit('/').next().unwrap_or(key);
    if name.len() != KEY_DIGITS || !name.bytes().all(|b| b.is_ascii_digit()) {
        bail!("malformed snapshot key: {key}");
    }
    let inverted: i64 = name
        .parse()
        .with_context(|| format!("snapshot_key_parse: {key}"))?;
    Ok(MAX_SEQ - inverted)
}
