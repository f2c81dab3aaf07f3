//! Chain state owned by the blockchain lock
//!
//! Everything here runs with the chain mutex held. Index mutation goes
//! through `push_transaction`/`pop_transaction` so that accepting blocks,
//! undoing them and rebuilding from disk all produce identical indices.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::consensus::{Block, Checkpoints, Currency, UpgradeDetector};
use crate::constants::{BLOCK_MAJOR_VERSION_1, BLOCK_MAJOR_VERSION_2};
use crate::crypto::Hash;
use crate::storage::cache::{CacheError, CacheFile, BLOCKCHAIN_INDICES_VERSION, BLOCKS_CACHE_VERSION};
use crate::storage::{
    BlockEntry, BlockStore, ChainIndices, IndexError, OrphanBlocksIndex, SecondaryIndices, StorageError,
    TransactionEntry, TransactionIndex,
};
use crate::validation::Transaction;

use super::error::InitError;
use super::messages::MessageQueueList;

/// Seconds since the unix epoch
pub(crate) fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Median with the two middle values averaged; zero for no values
pub(crate) fn median(mut values: Vec<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        ((values[n / 2 - 1] as u128 + values[n / 2] as u128) / 2) as u64
    }
}

pub(crate) struct ChainState {
    pub(crate) currency: Arc<Currency>,
    pub(crate) store: BlockStore,
    pub(crate) indices: ChainIndices,
    pub(crate) secondary: SecondaryIndices,
    pub(crate) orphans: OrphanBlocksIndex,
    /// Blocks off the main chain, keyed by id. Their entries carry height
    /// and cumulative difficulty but no transactions.
    pub(crate) alternative_chains: HashMap<Hash, BlockEntry>,
    pub(crate) checkpoints: Checkpoints,
    pub(crate) upgrade_detector: UpgradeDetector,
    pub(crate) current_block_cumul_size_limit: u64,
    pub(crate) in_checkpoint_zone: bool,
    pub(crate) messages: MessageQueueList,
    blocks_cache: CacheFile,
    indices_cache: CacheFile,
}

impl ChainState {
    pub(crate) fn open(currency: Arc<Currency>, checkpoints: Checkpoints, folder: &Path) -> Result<Self, InitError> {
        fs::create_dir_all(folder)?;
        let store = BlockStore::open(folder.join(currency.blocks_file_name()))?;
        let blocks_cache = CacheFile::new(folder.join(currency.blocks_cache_file_name()), BLOCKS_CACHE_VERSION);
        let indices_cache = CacheFile::new(
            folder.join(currency.blockchain_indices_file_name()),
            BLOCKCHAIN_INDICES_VERSION,
        );
        let upgrade_detector = UpgradeDetector::new(&currency, BLOCK_MAJOR_VERSION_2);

        let mut state = Self {
            currency,
            store,
            indices: ChainIndices::default(),
            secondary: SecondaryIndices::default(),
            orphans: OrphanBlocksIndex::default(),
            alternative_chains: HashMap::new(),
            checkpoints,
            upgrade_detector,
            current_block_cumul_size_limit: 0,
            in_checkpoint_zone: false,
            messages: MessageQueueList::default(),
            blocks_cache,
            indices_cache,
        };
        state.update_next_cumulative_size_limit();
        Ok(state)
    }

    /// Number of main-chain blocks
    pub(crate) fn height(&self) -> u32 {
        self.store.len()
    }

    pub(crate) fn tail_id(&self) -> Hash {
        self.indices.block_index.tail_id().unwrap_or_default()
    }

    pub(crate) fn have_block(&self, hash: &Hash) -> bool {
        self.indices.block_index.has_block(hash) || self.alternative_chains.contains_key(hash)
    }

    pub(crate) fn block_major_version_for_height(&self, height: u32) -> u8 {
        if height > self.upgrade_detector.upgrade_height() {
            BLOCK_MAJOR_VERSION_2
        } else {
            BLOCK_MAJOR_VERSION_1
        }
    }

    /// Cumulative sizes of the last `count` main-chain blocks
    pub(crate) fn last_blocks_sizes(&self, count: usize) -> Vec<u64> {
        let summaries = self.store.summaries();
        let start = summaries.len().saturating_sub(count);
        summaries[start..].iter().map(|s| s.block_cumulative_size).collect()
    }

    /// Cumulative sizes of up to `count` blocks ending at `from_height`
    pub(crate) fn backward_blocks_sizes(&self, from_height: u32, count: usize) -> Vec<u64> {
        let summaries = self.store.summaries();
        if from_height as usize >= summaries.len() {
            return Vec::new();
        }
        let end = from_height as usize + 1;
        let start = end.saturating_sub(count);
        summaries[start..end].iter().map(|s| s.block_cumulative_size).collect()
    }

    pub(crate) fn difficulty_for_next_block(&self) -> u64 {
        let summaries = self.store.summaries();
        let count = self.currency.difficulty_blocks_count().min(summaries.len());
        // The genesis block never takes part
        let start = (summaries.len() - count).max(1);
        let (timestamps, cumulative_difficulties) = summaries
            .get(start..)
            .unwrap_or_default()
            .iter()
            .map(|s| (s.timestamp, s.cumulative_difficulty))
            .unzip();
        self.currency.next_difficulty(timestamps, cumulative_difficulties)
    }

    pub(crate) fn update_next_cumulative_size_limit(&mut self) {
        let version = self.block_major_version_for_height(self.height());
        let full_reward_zone = self.currency.block_granted_full_reward_zone_by_block_version(version);
        let median = median(self.last_blocks_sizes(self.currency.reward_blocks_window()));
        self.current_block_cumul_size_limit = median.max(full_reward_zone).saturating_mul(2);
    }

    pub(crate) fn is_spend_time_unlocked(&self, unlock_time: u64) -> bool {
        self.currency.is_unlocked(unlock_time, self.height(), unix_time())
    }

    pub(crate) fn push_transaction(
        &mut self,
        hash: Hash,
        index: TransactionIndex,
        entry: &mut TransactionEntry,
    ) -> Result<(), IndexError> {
        self.indices.push_transaction(hash, index, entry)?;
        self.secondary.payment_ids.add(&entry.tx);
        Ok(())
    }

    pub(crate) fn pop_transaction(&mut self, hash: &Hash, tx: &Transaction) {
        self.secondary.payment_ids.remove(tx);
        self.indices.pop_transaction(hash, tx);
    }

    /// Unindex every transaction of `entry`, last first
    pub(crate) fn pop_transactions(&mut self, entry: &BlockEntry) {
        for transaction in entry.transactions.iter().rev() {
            self.pop_transaction(&transaction.tx.hash(), &transaction.tx);
        }
    }

    pub(crate) fn index_block_secondary(&mut self, block: &Block, hash: Hash) {
        self.secondary.timestamps.add(block.timestamp(), hash);
        if !self.secondary.generated_transactions.add(block) {
            error!(block = %hash, "Generated transactions index out of sync");
        }
    }

    fn unindex_block_secondary(&mut self, block: &Block, hash: &Hash) {
        if !self.secondary.timestamps.remove(block.timestamp(), hash) {
            error!(block = %hash, "Timestamp index out of sync");
        }
        if !self.secondary.generated_transactions.remove(block) {
            error!(block = %hash, "Generated transactions index out of sync");
        }
    }

    /// Drop the tip without handing its transactions anywhere
    pub(crate) fn remove_last_block(&mut self) -> Result<BlockEntry, StorageError> {
        let entry = self.store.pop()?;
        let hash = entry.block.hash();
        debug!(height = entry.height, block = %hash, "Removing last block");

        self.pop_transactions(&entry);
        self.unindex_block_secondary(&entry.block, &hash);
        if self.indices.block_index.pop() != Some(hash) {
            error!(block = %hash, "Block index out of sync with the block store");
        }
        Ok(entry)
    }

    /// Remove blocks until `height` is the tip
    pub(crate) fn rollback_to(&mut self, height: u32) -> Result<(), StorageError> {
        while height + 1 < self.height() {
            self.remove_last_block()?;
            self.upgrade_detector.block_popped(&self.store);
        }
        self.update_next_cumulative_size_limit();
        Ok(())
    }

    /// Replay every stored block into fresh primary indices
    pub(crate) fn rebuild_cache(&mut self) -> Result<(), StorageError> {
        info!(blocks = self.height(), "Rebuilding internal structures");
        self.indices.clear();
        for height in 0..self.height() {
            let entry = self.store.get(height)?;
            let hash = entry.block.hash();
            if !self.indices.block_index.push(hash) {
                return Err(StorageError::Corrupted(format!("block {} stored twice", hash)));
            }

            for (position, transaction) in entry.transactions.iter().enumerate() {
                let index = TransactionIndex {
                    block: height,
                    transaction: position as u16,
                };
                let mut replay = transaction.clone();
                self.indices
                    .push_transaction(transaction.tx.hash(), index, &mut replay)
                    .map_err(|e| StorageError::Corrupted(format!("height {}: {}", height, e)))?;
                if replay.global_output_indexes != transaction.global_output_indexes {
                    warn!(height, transaction = position, "Stored global output indexes differ from replay");
                }
            }
        }
        Ok(())
    }

    /// Recompute payment ids, timestamps and generated-transaction counts
    pub(crate) fn rebuild_secondary(&mut self) -> Result<(), StorageError> {
        info!(blocks = self.height(), "Rebuilding blockchain indices");
        self.secondary.clear();
        for height in 0..self.height() {
            let entry = self.store.get(height)?;
            self.index_block_secondary(&entry.block, entry.block.hash());
            for transaction in &entry.transactions {
                self.secondary.payment_ids.add(&transaction.tx);
            }
        }
        Ok(())
    }

    /// Load both caches, rebuilding whichever is absent or stale
    pub(crate) fn load_caches(&mut self) -> Result<(), StorageError> {
        let Some(tail) = self.store.last_summary().map(|s| s.hash) else {
            return Ok(());
        };

        match self.blocks_cache.load::<ChainIndices>(&tail) {
            Ok(Some(indices)) if indices.block_index.size() == self.height() => {
                info!(path = %self.blocks_cache.path().display(), "Loaded blockchain cache");
                self.indices = indices;
            }
            Ok(_) => {
                info!("No actual blockchain cache found, rebuilding internal structures");
                self.rebuild_cache()?;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read blockchain cache, rebuilding internal structures");
                self.rebuild_cache()?;
            }
        }

        match self.indices_cache.load::<SecondaryIndices>(&tail) {
            Ok(Some(secondary)) if secondary.generated_transactions.len() == self.height() as usize => {
                info!(path = %self.indices_cache.path().display(), "Loaded blockchain indices");
                self.secondary = secondary;
            }
            Ok(_) => self.rebuild_secondary()?,
            Err(e) => {
                warn!(error = %e, "Failed to read blockchain indices, rebuilding");
                self.rebuild_secondary()?;
            }
        }
        Ok(())
    }

    /// Snapshot both caches at the current tail
    pub(crate) fn store_caches(&self) -> Result<(), CacheError> {
        let tail = self.tail_id();
        self.blocks_cache.store(&tail, &self.indices)?;
        self.indices_cache.store(&tail, &self.secondary)?;
        info!(height = self.height(), tail = %tail, "Saved blockchain cache");
        Ok(())
    }

    /// Height of the last checkpoint the stored chain agrees with, or
    /// `None` when every reachable checkpoint matches
    pub(crate) fn find_checkpoint_mismatch(&self) -> Option<u32> {
        let mut last_valid = 0;
        for (height, _) in self.checkpoints.iter() {
            if height >= self.height() {
                break;
            }
            let hash = self.indices.block_index.get_block_id(height).unwrap_or_default();
            match self.checkpoints.check_block(height, &hash) {
                (true, _) => last_valid = height,
                (false, _) => return Some(last_valid),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(vec![]), 0);
        assert_eq!(median(vec![7]), 7);
        assert_eq!(median(vec![9, 1, 5]), 5);
        assert_eq!(median(vec![4, 1, 3, 2]), 2);
        assert_eq!(median(vec![u64::MAX, u64::MAX]), u64::MAX);
    }
}
