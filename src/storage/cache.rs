//! Index cache files
//!
//! Layout: `version: u8`, the 32-byte id of the chain tail the snapshot
//! was taken at, then the bincode-encoded indices. A snapshot is only
//! usable if both the version and the tail id match; anything else means
//! rebuilding from the block store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::Hash;

/// Version of the primary index cache
pub const BLOCKS_CACHE_VERSION: u8 = 1;
/// Version of the secondary index cache
pub const BLOCKCHAIN_INDICES_VERSION: u8 = 1;

const HEADER_SIZE: usize = 1 + 32;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Cache file is truncated")]
    Truncated,
    #[error("Block store error: {0}")]
    Store(#[from] crate::storage::StorageError),
}

/// One versioned snapshot file
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
    version: u8,
}

impl CacheFile {
    pub fn new<P: AsRef<Path>>(path: P, version: u8) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `value` as the snapshot for chain tail `last_block_hash`.
    ///
    /// The file is replaced atomically through a temporary sibling.
    pub fn store<T: Serialize>(&self, last_block_hash: &Hash, value: &T) -> Result<(), CacheError> {
        let body = bincode::serialize(value)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&[self.version])?;
            file.write_all(&last_block_hash.0)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = body.len() + HEADER_SIZE, "Stored cache");
        Ok(())
    }

    /// Load the snapshot if it was taken at `last_block_hash`.
    ///
    /// `Ok(None)` means absent, outdated or stale; nothing is decoded in
    /// that case.
    pub fn load<T: DeserializeOwned>(&self, last_block_hash: &Hash) -> Result<Option<T>, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < HEADER_SIZE {
            return Err(CacheError::Truncated);
        }

        if bytes[0] != self.version {
            info!(path = %self.path.display(), found = bytes[0], expected = self.version, "Cache version mismatch");
            return Ok(None);
        }

        let mut tail = [0u8; 32];
        tail.copy_from_slice(&bytes[1..HEADER_SIZE]);
        if Hash(tail) != *last_block_hash {
            info!(
                path = %self.path.display(),
                cached = %Hash(tail),
                tail = %last_block_hash,
                "Cache is stale"
            );
            return Ok(None);
        }

        Ok(Some(bincode::deserialize(&bytes[HEADER_SIZE..])?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;
    use std::collections::BTreeMap;

    fn sample() -> BTreeMap<u64, Vec<u32>> {
        let mut map = BTreeMap::new();
        map.insert(10, vec![1, 2, 3]);
        map.insert(20, vec![4]);
        map
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheFile::new(dir.path().join("cache.dat"), 1);
        let tail = hash_bytes(b"tail");

        cache.store(&tail, &sample()).unwrap();
        let loaded: Option<BTreeMap<u64, Vec<u32>>> = cache.load(&tail).unwrap();
        assert_eq!(loaded, Some(sample()));
    }

    #[test]
    fn test_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheFile::new(dir.path().join("none.dat"), 1);
        let loaded: Option<Vec<u8>> = cache.load(&Hash::zero()).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_stale_tail_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheFile::new(dir.path().join("cache.dat"), 1);
        cache.store(&hash_bytes(b"old"), &sample()).unwrap();

        let loaded: Option<BTreeMap<u64, Vec<u32>>> = cache.load(&hash_bytes(b"new")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_old_version_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let tail = hash_bytes(b"tail");
        CacheFile::new(&path, 1).store(&tail, &sample()).unwrap();

        let loaded: Option<BTreeMap<u64, Vec<u32>>> = CacheFile::new(&path, 2).load(&tail).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        let result: Result<Option<Vec<u8>>, _> = CacheFile::new(&path, 1).load(&Hash::zero());
        assert!(matches!(result, Err(CacheError::Truncated)));
    }
}
