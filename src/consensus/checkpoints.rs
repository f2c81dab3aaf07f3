//! Checkpoints
//!
//! Operator-trusted (height, hash) pins. Inside the checkpoint zone the
//! main chain is validated against them instead of proof of work, and
//! alternative chains may not fork below the last checkpoint.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::crypto::Hash;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Invalid checkpoint hash at height {0}")]
    InvalidHash(u32),
    #[error("Checkpoint at height {0} already exists")]
    Duplicate(u32),
    #[error("Invalid checkpoint list: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct CheckpointEntry {
    height: u32,
    hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    points: BTreeMap<u32, Hash>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON list of `{"height": n, "hash": "hex"}` entries
    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let entries: Vec<CheckpointEntry> = serde_json::from_str(json)?;
        let mut checkpoints = Self::new();
        for entry in entries {
            checkpoints.add_checkpoint_hex(entry.height, &entry.hash)?;
        }
        info!(count = checkpoints.points.len(), "Loaded checkpoints");
        Ok(checkpoints)
    }

    pub fn add_checkpoint(&mut self, height: u32, hash: Hash) -> Result<(), CheckpointError> {
        if self.points.contains_key(&height) {
            return Err(CheckpointError::Duplicate(height));
        }
        self.points.insert(height, hash);
        Ok(())
    }

    pub fn add_checkpoint_hex(&mut self, height: u32, hash: &str) -> Result<(), CheckpointError> {
        let hash = Hash::from_hex(hash).map_err(|_| CheckpointError::InvalidHash(height))?;
        self.add_checkpoint(height, hash)
    }

    /// Whether `height` is at or below the last checkpoint
    pub fn is_in_checkpoint_zone(&self, height: u32) -> bool {
        self.last_checkpoint_height().map_or(false, |last| height <= last)
    }

    pub fn last_checkpoint_height(&self) -> Option<u32> {
        self.points.keys().next_back().copied()
    }

    /// Check `hash` against the checkpoint at `height`.
    ///
    /// Returns `(valid, is_checkpoint)`; heights without a checkpoint are
    /// always valid.
    pub fn check_block(&self, height: u32, hash: &Hash) -> (bool, bool) {
        match self.points.get(&height) {
            None => (true, false),
            Some(expected) if expected == hash => {
                info!(height, %hash, "Checkpoint passed");
                (true, true)
            }
            Some(expected) => {
                warn!(height, %hash, %expected, "Checkpoint failed");
                (false, true)
            }
        }
    }

    /// Whether a block at `block_height` may start or extend an
    /// alternative chain while the main chain has `blockchain_height` blocks
    pub fn is_alternative_block_allowed(&self, blockchain_height: u32, block_height: u32) -> bool {
        if block_height == 0 {
            return false;
        }
        match self.points.range(..=blockchain_height).next_back() {
            None => true,
            Some((checkpoint_height, _)) => *checkpoint_height < block_height,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Hash)> {
        self.points.iter().map(|(h, hash)| (*h, hash))
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    fn checkpoints() -> Checkpoints {
        let mut c = Checkpoints::new();
        c.add_checkpoint(10, hash_bytes(b"10")).unwrap();
        c.add_checkpoint(20, hash_bytes(b"20")).unwrap();
        c
    }

    #[test]
    fn test_checkpoint_zone() {
        let c = checkpoints();
        assert!(c.is_in_checkpoint_zone(0));
        assert!(c.is_in_checkpoint_zone(20));
        assert!(!c.is_in_checkpoint_zone(21));
        assert!(!Checkpoints::new().is_in_checkpoint_zone(0));
    }

    #[test]
    fn test_check_block() {
        let c = checkpoints();
        assert_eq!(c.check_block(5, &hash_bytes(b"x")), (true, false));
        assert_eq!(c.check_block(10, &hash_bytes(b"10")), (true, true));
        assert_eq!(c.check_block(10, &hash_bytes(b"x")), (false, true));
    }

    #[test]
    fn test_alternative_block_allowed() {
        let c = checkpoints();
        assert!(!c.is_alternative_block_allowed(5, 0));
        assert!(c.is_alternative_block_allowed(5, 3));
        assert!(!c.is_alternative_block_allowed(15, 10));
        assert!(c.is_alternative_block_allowed(15, 11));
        assert!(!c.is_alternative_block_allowed(25, 20));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut c = checkpoints();
        assert!(matches!(
            c.add_checkpoint(10, Hash::zero()),
            Err(CheckpointError::Duplicate(10))
        ));
    }

    #[test]
    fn test_from_json() {
        let hash = hash_bytes(b"7");
        let json = format!(r#"[{{"height": 7, "hash": "{}"}}]"#, hash.to_hex());
        let c = Checkpoints::from_json(&json).unwrap();
        assert_eq!(c.check_block(7, &hash), (true, true));

        assert!(matches!(
            Checkpoints::from_json(r#"[{"height": 1, "hash": "zz"}]"#),
            Err(CheckpointError::InvalidHash(1))
        ));
    }
}
