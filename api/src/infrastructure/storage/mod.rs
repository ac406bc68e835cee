use std::sync::Arc;

use crate::application::ports::object_store_port::ObjectStorePort;
use crate::bootstrap::config::{Config, StorageBackend};

mod fs_object_store;
mod s3_object_store;

pub use fs_object_store::FsObjectStore;
pub use s3_object_store::S3ObjectStore;

pub async fn build_object_store(cfg: &Config) -> anyhow::Result<Arc<dyn ObjectStorePort>> {
    Ok(match cfg.storage_backend {
        StorageBackend::Filesystem => Arc::new(FsObjectStore::new(&cfg.storage_root)),
        StorageBackend::S3 => Arc::new(S3ObjectStore::new(cfg).await?),
    })
}
