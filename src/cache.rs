//! Staging cache for decoded block payloads.
//!
//! Payloads wait here until their owning version completes and can be
//! uploaded. Layout is `<root>/<bucket>/<block_id>`; writes are
//! create-truncate, reads are whole-file, and files are removed right after
//! their version has been emitted. The cache is ephemeral and safe to wipe.

use crate::error::{RestoreError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StagingCache {
    root: PathBuf,
}

impl StagingCache {
    /// Open the cache rooted at `root`, wiping any previous content when
    /// `clean` is set.
    pub fn open(root: impl Into<PathBuf>, clean: bool) -> Result<Self> {
        let root = root.into();
        if clean && root.exists() {
            fs::remove_dir_all(&root)
                .map_err(|e| RestoreError::cache(format!("wipe {}: {}", root.display(), e)))?;
        }
        fs::create_dir_all(&root)
            .map_err(|e| RestoreError::cache(format!("create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn block_path(&self, bucket: &str, block_id: &str) -> PathBuf {
        self.root.join(bucket).join(block_id)
    }

    /// Stage a block payload, replacing any previous bytes for the same id.
    pub fn write_block(&self, bucket: &str, block_id: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = self.root.join(bucket);
        fs::create_dir_all(&dir)
            .map_err(|e| RestoreError::cache(format!("create {}: {}", dir.display(), e)))?;
        let path = dir.join(block_id);
        fs::write(&path, data)
            .map_err(|e| RestoreError::cache(format!("write {}: {}", path.display(), e)))?;
        debug!("staged block {} ({} bytes)", block_id, data.len());
        Ok(path)
    }

    pub fn read_block(&self, bucket: &str, block_id: &str) -> Result<Vec<u8>> {
        let path = self.block_path(bucket, block_id);
        fs::read(&path).map_err(|e| RestoreError::cache(format!("read {}: {}", path.display(), e)))
    }

    /// Drop a staged payload after its version has been emitted.
    pub fn remove_block(&self, bucket: &str, block_id: &str) -> Result<()> {
        let path = self.block_path(bucket, block_id);
        fs::remove_file(&path)
            .map_err(|e| RestoreError::cache(format!("remove {}: {}", path.display(), e)))
    }

    pub fn contains(&self, bucket: &str, block_id: &str) -> bool {
        self.block_path(bucket, block_id).is_file()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let cache = StagingCache::open(dir.path().join("cache"), false).unwrap();

        let path = cache.write_block("b", "blk1", b"payload").unwrap();
        assert!(path.is_file());
        assert!(cache.contains("b", "blk1"));
        assert_eq!(cache.read_block("b", "blk1").unwrap(), b"payload");

        cache.remove_block("b", "blk1").unwrap();
        assert!(!cache.contains("b", "blk1"));
    }

    #[test]
    fn test_write_truncates() {
        let dir = TempDir::new().unwrap();
        let cache = StagingCache::open(dir.path().join("cache"), false).unwrap();
        cache.write_block("b", "blk1", b"a longer first payload").unwrap();
        cache.write_block("b", "blk1", b"short").unwrap();
        assert_eq!(cache.read_block("b", "blk1").unwrap(), b"short");
    }

    #[test]
    fn test_clean_wipes_previous_content() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let cache = StagingCache::open(&root, false).unwrap();
        cache.write_block("b", "blk1", b"x").unwrap();

        let cache = StagingCache::open(&root, true).unwrap();
        assert!(!cache.contains("b", "blk1"));
    }
}
