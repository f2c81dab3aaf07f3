//! Block store using Sled
//!
//! Append-only, height-indexed storage of main-chain block entries. Each
//! height has two records in one tree: the full entry and a small summary.
//! Summaries are kept in memory so difficulty, timestamp and size windows
//! never touch the disk.

use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::consensus::{Block, VersionHistory};
use crate::crypto::Hash;
use crate::validation::Transaction;

const ENTRY_PREFIX: u8 = b'b';
const SUMMARY_PREFIX: u8 = b's';
const TREE_NAME: &str = "blocks";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Db(#[from] sled::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Block at height {0} is missing")]
    MissingBlock(u32),
    #[error("Block store is corrupted: {0}")]
    Corrupted(String),
}

/// A transaction with the global indexes assigned to its outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub tx: Transaction,
    pub global_output_indexes: Vec<u32>,
}

/// A block as accepted into a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub block: Block,
    pub height: u32,
    pub block_cumulative_size: u64,
    pub cumulative_difficulty: u64,
    pub already_generated_coins: u64,
    /// Coinbase first, then the block's transactions in order
    pub transactions: Vec<TransactionEntry>,
}

/// Fixed-size facts about a stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub hash: Hash,
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub block_cumulative_size: u64,
    pub cumulative_difficulty: u64,
    pub already_generated_coins: u64,
    pub transaction_count: u32,
}

impl BlockEntry {
    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            hash: self.block.hash(),
            major_version: self.block.header.major_version,
            minor_version: self.block.header.minor_version,
            timestamp: self.block.header.timestamp,
            block_cumulative_size: self.block_cumulative_size,
            cumulative_difficulty: self.cumulative_difficulty,
            already_generated_coins: self.already_generated_coins,
            transaction_count: self.transactions.len() as u32,
        }
    }
}

fn key(prefix: u8, height: u32) -> [u8; 5] {
    let mut key = [prefix; 5];
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

/// Persistent main-chain block vector
#[derive(Debug)]
pub struct BlockStore {
    db: Db,
    blocks: Tree,
    summaries: Vec<BlockSummary>,
}

impl BlockStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree(TREE_NAME)?;

        let mut summaries = Vec::new();
        for item in blocks.scan_prefix([SUMMARY_PREFIX]) {
            let (_, value) = item?;
            summaries.push(bincode::deserialize::<BlockSummary>(&value)?);
        }
        let entries = blocks.scan_prefix([ENTRY_PREFIX]).count();
        if entries != summaries.len() {
            return Err(StorageError::Corrupted(format!(
                "{} entries but {} summaries",
                entries,
                summaries.len()
            )));
        }

        debug!(blocks = summaries.len(), "Opened block store");
        Ok(Self { db, blocks, summaries })
    }

    /// Number of stored blocks
    pub fn len(&self) -> u32 {
        self.summaries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    /// Load the full entry at `height`
    pub fn get(&self, height: u32) -> Result<BlockEntry, StorageError> {
        match self.blocks.get(key(ENTRY_PREFIX, height))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(StorageError::MissingBlock(height)),
        }
    }

    pub fn summary(&self, height: u32) -> Option<&BlockSummary> {
        self.summaries.get(height as usize)
    }

    pub fn summaries(&self) -> &[BlockSummary] {
        &self.summaries
    }

    pub fn last_summary(&self) -> Option<&BlockSummary> {
        self.summaries.last()
    }

    /// Append `entry`, which must sit at the next height
    pub fn push(&mut self, entry: &BlockEntry) -> Result<(), StorageError> {
        if entry.height != self.len() {
            return Err(StorageError::Corrupted(format!(
                "pushing height {} onto {} blocks",
                entry.height,
                self.len()
            )));
        }

        let summary = entry.summary();
        let mut batch = Batch::default();
        batch.insert(key(ENTRY_PREFIX, entry.height).to_vec(), bincode::serialize(entry)?);
        batch.insert(key(SUMMARY_PREFIX, entry.height).to_vec(), bincode::serialize(&summary)?);
        self.blocks.apply_batch(batch)?;
        self.db.flush()?;

        self.summaries.push(summary);
        Ok(())
    }

    /// Remove and return the last entry
    pub fn pop(&mut self) -> Result<BlockEntry, StorageError> {
        let height = self
            .len()
            .checked_sub(1)
            .ok_or_else(|| StorageError::Corrupted("pop from empty store".to_string()))?;
        let entry = self.get(height)?;

        let mut batch = Batch::default();
        batch.remove(key(ENTRY_PREFIX, height).to_vec());
        batch.remove(key(SUMMARY_PREFIX, height).to_vec());
        self.blocks.apply_batch(batch)?;
        self.db.flush()?;

        self.summaries.pop();
        Ok(entry)
    }

    /// Overwrite the entry at `height` with bytes that do not decode
    #[cfg(test)]
    pub(crate) fn corrupt_entry(&self, height: u32) -> Result<(), StorageError> {
        self.blocks.insert(key(ENTRY_PREFIX, height), &[0xffu8][..])?;
        Ok(())
    }

    /// Drop every stored block
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.blocks.clear()?;
        self.db.flush()?;
        self.summaries.clear();
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl VersionHistory for BlockStore {
    fn block_count(&self) -> u32 {
        self.len()
    }

    fn block_version(&self, height: u32) -> Option<(u8, u8)> {
        self.summary(height).map(|s| (s.major_version, s.minor_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{BlockHeader, CurrencyBuilder};

    fn entry(height: u32, previous: Hash) -> BlockEntry {
        let currency = CurrencyBuilder::new().build().unwrap();
        let mut base = currency.genesis_block().base_transaction.clone();
        base.prefix.inputs = vec![crate::validation::TransactionInput::Base(
            crate::validation::BaseInput { block_index: height },
        )];
        let block = Block::new(
            BlockHeader {
                major_version: 1,
                minor_version: 0,
                nonce: height,
                timestamp: 1_000 + height as u64,
                previous_block_hash: previous,
            },
            base.clone(),
            vec![],
        );
        BlockEntry {
            block,
            height,
            block_cumulative_size: base.blob_size(),
            cumulative_difficulty: height as u64 + 1,
            already_generated_coins: 0,
            transactions: vec![TransactionEntry {
                tx: base,
                global_output_indexes: vec![height],
            }],
        }
    }

    #[test]
    fn test_push_get_pop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(dir.path()).unwrap();
        assert!(store.is_empty());

        let first = entry(0, Hash::zero());
        let second = entry(1, first.block.hash());
        store.push(&first).unwrap();
        store.push(&second).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap(), second);
        assert_eq!(store.last_summary().unwrap().hash, second.block.hash());
        assert_eq!(store.summary(0).unwrap().cumulative_difficulty, 1);

        assert_eq!(store.pop().unwrap(), second);
        assert_eq!(store.len(), 1);
        assert!(matches!(store.get(1), Err(StorageError::MissingBlock(1))));
    }

    #[test]
    fn test_push_rejects_wrong_height() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(dir.path()).unwrap();
        assert!(store.push(&entry(3, Hash::zero())).is_err());
        assert!(store.pop().is_err());
    }

    #[test]
    fn test_reopen_keeps_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let first = entry(0, Hash::zero());
        {
            let mut store = BlockStore::open(dir.path()).unwrap();
            store.push(&first).unwrap();
        }
        let store = BlockStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.summary(0).unwrap().hash, first.block.hash());
    }
}
