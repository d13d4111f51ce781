//! Content-addressed shard store.
//!
//! Shard bytes live as flat files named by their content address under a
//! single root directory. Writes land in a temp file and rename into
//! place on commit, so readers only ever observe complete shards.
//! Unlinking while a reader holds the file open is safe; the reader
//! finishes against the old inode.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use silo_protocol::hashing::is_content_hash;

use crate::{Result, StoreError};

/// Disk accounting for capacity announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StorageUsage {
    /// Bytes still available under the configured allocation.
    pub available: u64,
    /// Total bytes allocated to shard storage.
    pub allocated: u64,
}

/// Filesystem-backed shard store.
#[derive(Debug, Clone)]
pub struct ShardStore {
    root: PathBuf,
    allocated: u64,
}

impl ShardStore {
    /// Open the store rooted at `root` with a byte allocation.
    pub fn open(root: PathBuf, allocated: u64) -> Result<Self> {
        if root.as_os_str().is_empty() {
            return Err(StoreError::InvalidHash("storage root is empty".to_string()));
        }
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, allocated })
    }

    fn validate_hash(&self, hash: &str) -> Result<()> {
        if !is_content_hash(hash) {
            return Err(StoreError::InvalidHash(hash.to_string()));
        }
        Ok(())
    }

    fn data_path(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    /// Whether a shard is present.
    pub async fn exists(&self, hash: &str) -> Result<bool> {
        self.validate_hash(hash)?;
        Ok(tokio::fs::metadata(self.data_path(hash)).await.is_ok())
    }

    /// Open a read stream over a shard.
    pub async fn read_stream(&self, hash: &str) -> Result<File> {
        self.validate_hash(hash)?;
        match File::open(self.data_path(hash)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ShardNotFound(hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open a write stream for a shard. Bytes become visible under the
    /// content address only after [`ShardWriter::commit`].
    pub async fn write_stream(&self, hash: &str) -> Result<ShardWriter> {
        self.validate_hash(hash)?;
        let target = self.data_path(hash);
        let temp = target.with_extension("tmp");
        let file = File::create(&temp).await?;
        Ok(ShardWriter { file, temp, target })
    }

    /// Remove a shard. Missing files are not an error.
    pub async fn unlink(&self, hash: &str) -> Result<()> {
        self.validate_hash(hash)?;
        match tokio::fs::remove_file(self.data_path(hash)).await {
            Ok(()) => {
                tracing::debug!(hash = %hash, "Shard unlinked");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Size of a stored shard in bytes.
    pub async fn size_of(&self, hash: &str) -> Result<u64> {
        self.validate_hash(hash)?;
        match tokio::fs::metadata(self.data_path(hash)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ShardNotFound(hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current usage against the configured allocation.
    pub async fn usage(&self) -> Result<StorageUsage> {
        let mut used = 0u64;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_content_hash(&name) {
                used += entry.metadata().await?.len();
            }
        }
        Ok(StorageUsage {
            available: self.allocated.saturating_sub(used),
            allocated: self.allocated,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// In-flight shard write.
pub struct ShardWriter {
    file: File,
    temp: PathBuf,
    target: PathBuf,
}

impl ShardWriter {
    /// Append a chunk.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        Ok(())
    }

    /// Flush and publish the shard under its content address.
    pub async fn commit(mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        tokio::fs::rename(&self.temp, &self.target).await?;
        Ok(())
    }

    /// Discard the partial write.
    pub async fn abort(self) -> Result<()> {
        drop(self.file);
        match tokio::fs::remove_file(&self.temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_protocol::hashing::content_hash;
    use tokio::io::AsyncReadExt;

    async fn store_with(allocated: u64) -> (tempfile::TempDir, ShardStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path().to_path_buf(), allocated).unwrap();
        (dir, store)
    }

    async fn put_shard(store: &ShardStore, data: &[u8]) -> String {
        let hash = content_hash(data);
        let mut writer = store.write_stream(&hash).await.unwrap();
        writer.write_chunk(data).await.unwrap();
        writer.commit().await.unwrap();
        hash
    }

    #[tokio::test]
    async fn test_write_commit_read_round_trip() {
        let (_dir, store) = store_with(1024).await;
        let data = b"shard payload";
        let hash = put_shard(&store, data).await;

        assert!(store.exists(&hash).await.unwrap());
        assert_eq!(store.size_of(&hash).await.unwrap(), data.len() as u64);

        let mut reader = store.read_stream(&hash).await.unwrap();
        let mut read = Vec::new();
        reader.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn test_aborted_write_leaves_no_shard() {
        let (_dir, store) = store_with(1024).await;
        let hash = content_hash(b"never committed");

        let mut writer = store.write_stream(&hash).await.unwrap();
        writer.write_chunk(b"partial").await.unwrap();
        writer.abort().await.unwrap();

        assert!(!store.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_write_is_invisible() {
        let (_dir, store) = store_with(1024).await;
        let hash = content_hash(b"still writing");
        let mut writer = store.write_stream(&hash).await.unwrap();
        writer.write_chunk(b"still ").await.unwrap();
        assert!(!store.exists(&hash).await.unwrap());
        writer.write_chunk(b"writing").await.unwrap();
        writer.commit().await.unwrap();
        assert!(store.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlink_is_idempotent_and_safe_with_reader() {
        let (_dir, store) = store_with(1024).await;
        let data = b"read while unlinking";
        let hash = put_shard(&store, data).await;

        let mut reader = store.read_stream(&hash).await.unwrap();
        store.unlink(&hash).await.unwrap();
        store.unlink(&hash).await.unwrap();

        // The open reader still sees the old bytes.
        let mut read = Vec::new();
        reader.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, data);
        assert!(!store.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing_shard_is_not_found() {
        let (_dir, store) = store_with(1024).await;
        let hash = content_hash(b"absent");
        assert!(matches!(
            store.read_stream(&hash).await,
            Err(StoreError::ShardNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_canonical_hash() {
        let (_dir, store) = store_with(1024).await;
        for bad in ["", "../../etc/passwd", "ABCD", "zz"] {
            assert!(matches!(
                store.exists(bad).await,
                Err(StoreError::InvalidHash(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_usage_accounting() {
        let (_dir, store) = store_with(100).await;
        put_shard(&store, b"0123456789").await;

        let usage = store.usage().await.unwrap();
        assert_eq!(usage.allocated, 100);
        assert_eq!(usage.available, 90);
    }
}
