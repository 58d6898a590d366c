//! Filesystem block store.
//!
//! Each block is one file under a two-level directory tree keyed by the first
//! byte of its address. Writes go to a temporary sibling file that is renamed
//! over the target, so an interrupted write leaves the previous
//! representation in place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::blocks::address::BlockAddress;
use crate::store::{BlockStore, StoreError};

const BLOCK_EXTENSION: &str = "block";

#[derive(Debug, Default)]
pub struct DiskStoreStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
}

/// Block store rooted at a directory.
#[derive(Debug)]
pub struct DiskBlockStore {
    root: PathBuf,
    stats: DiskStoreStats,
}

impl DiskBlockStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            stats: DiskStoreStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a block: `<root>/<first byte hex>/<address>.block`.
    fn block_path(&self, address: &BlockAddress) -> PathBuf {
        let hex = address.to_hex();
        self.root
            .join(&hex[..2])
            .join(format!("{hex}.{BLOCK_EXTENSION}"))
    }

    pub fn stats(&self) -> &DiskStoreStats {
        &self.stats
    }

    /// Total bytes held by block files.
    pub async fn disk_usage(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.metadata().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(BLOCK_EXTENSION) {
                    continue;
                }
                total += entry.metadata().await?.len();
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl BlockStore for DiskBlockStore {
    async fn read(&self, address: &BlockAddress) -> Result<Vec<u8>, StoreError> {
        let path = self.block_path(address);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*address))
            }
            Err(e) => return Err(e.into()),
        };

        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data)
    }

    async fn write(&self, address: &BlockAddress, data: &[u8]) -> Result<(), StoreError> {
        let path = self.block_path(address);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("{BLOCK_EXTENSION}.tmp-{}", uuid::Uuid::new_v4()));
        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            address = %address.short_hex(),
            path = %path.display(),
            size = data.len(),
            "Wrote block to disk"
        );

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn contains(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.block_path(address)).await?)
    }

    async fn delete(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        match fs::remove_file(self.block_path(address)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read_block() {
        let tmp = TempDir::new().unwrap();
        let store = DiskBlockStore::open(tmp.path().join("blocks")).await.unwrap();
        let addr = BlockAddress::for_content(b"payload");

        store.write(&addr, &[42u8; 4096]).await.unwrap();
        assert_eq!(store.read(&addr).await.unwrap(), vec![42u8; 4096]);
        assert_eq!(store.disk_usage().await.unwrap(), 4096);
        assert_eq!(store.stats().total_writes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = DiskBlockStore::open(tmp.path()).await.unwrap();
        let addr = BlockAddress::for_content(b"payload");

        store.write(&addr, b"compressed").await.unwrap();
        store.write(&addr, b"raw").await.unwrap();
        assert_eq!(store.read(&addr).await.unwrap(), b"raw");

        let shard = store.block_path(&addr).parent().unwrap().to_path_buf();
        let files = std::fs::read_dir(shard).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_missing_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = DiskBlockStore::open(tmp.path()).await.unwrap();
        let addr = BlockAddress::for_content(b"gone");

        assert!(matches!(store.read(&addr).await, Err(StoreError::NotFound(_))));
        store.write(&addr, b"x").await.unwrap();
        assert!(store.contains(&addr).await.unwrap());
        assert!(store.delete(&addr).await.unwrap());
        assert!(!store.delete(&addr).await.unwrap());
    }
}
