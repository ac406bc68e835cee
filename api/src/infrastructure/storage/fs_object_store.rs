use std::path::{Component, Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::task;
use walkdir::WalkDir;

use crate::application::ports::object_store_port::ObjectStorePort;

const TMP_SUFFIX: &str = ".tmp";

/// Object store backed by a directory tree; keys map to relative paths.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid object key: {key}");
        }
        Ok(self.root.join(relative))
    }
}

fn list_sync(root: &Path, prefix: &str) -> anyhow::Result<Vec<String>> {
    // Walk only the deepest directory the prefix names.
    let dir_part = match prefix.rfind('/') {
        Some(idx) => &prefix[..idx],
        None => "",
    };
    let base = root.join(dir_part);
    if !base.is_dir() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for entry in WalkDir::new(&base) {
        let entry = entry.with_context(|| format!("walk {}", base.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("object path outside root")?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.ends_with(TMP_SUFFIX) || !key.starts_with(prefix) {
            continue;
        }
        keys.push(key);
    }
    keys.sort();
    Ok(keys)
}

#[async_trait]
impl ObjectStorePort for FsObjectStore {
    async fn put_object(
        &self,
        key: &str,
        _content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create_dir_all {}", parent.display()))?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename {}", path.display()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn list_first(&self, prefix: &str) -> anyhow::Result<Option<String>> {
        Ok(self.list(prefix).await?.into_iter().next())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.trim_start_matches('/').to_string();
        task::spawn_blocking(move || list_sync(&root, &prefix))
            .await
            .context("fs_list_join")?
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::domain::documents::snapshot::{snapshot_key, snapshot_prefix};

    #[tokio::test]
    async fn lists_newest_snapshot_first() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        for seq in [5, 1000, 20] {
            store
                .put_object(&snapshot_key("v3", "doc", seq), "application/octet-stream", vec![seq as u8])
                .await
                .unwrap();
        }
        store
            .put_object(&snapshot_key("v3", "other", 9999), "application/octet-stream", vec![])
            .await
            .unwrap();

        let first = store.list_first(&snapshot_prefix("v3", "doc")).await.unwrap();
        assert_eq!(first, Some(snapshot_key("v3", "doc", 1000)));
        assert_eq!(store.list(&snapshot_prefix("v3", "doc")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_objects_and_prefixes_are_empty() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert_eq!(store.get_object("v3/none/snapshots/1").await.unwrap(), None);
        assert_eq!(store.list_first("v3/none/snapshots/").await.unwrap(), None);

        store.put_object("logs/doc/a.log", "text/plain", b"x".to_vec()).await.unwrap();
        assert_eq!(store.get_object("logs/doc/a.log").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.put_object("../escape", "text/plain", vec![]).await.is_err());
        assert!(store.get_object("a/../../b").await.is_err());
    }
}
