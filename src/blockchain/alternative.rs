//! Alternative chains and reorganization
//!
//! A block whose parent is not the main-chain tail is kept in
//! `alternative_chains` once it passes the checks that need no
//! transactions. When a branch becomes heavier than the main chain, or
//! reaches a checkpoint, the main chain switches to it. A failed switch
//! puts the original blocks back.

use tracing::{error, info, warn};

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::pool::TransactionPool;
use crate::storage::BlockEntry;

use super::error::BlockError;
use super::messages::BlockchainMessage;
use super::state::ChainState;

/// What happened to a block that did not extend the main chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AlternativeOutcome {
    /// The parent is unknown
    Orphaned,
    /// Stored on a branch lighter than the main chain
    Added,
    /// The branch became the main chain
    Switched,
}

impl ChainState {
    /// Branch ids ordered from the first block after the main chain up
    /// to `tip`
    fn alternative_branch(&self, tip: &Hash) -> Vec<Hash> {
        let mut branch = Vec::new();
        let mut cursor = *tip;
        while let Some(entry) = self.alternative_chains.get(&cursor) {
            branch.push(cursor);
            cursor = *entry.block.previous_block_hash();
        }
        branch.reverse();
        branch
    }

    /// Extend `timestamps` with main-chain timestamps from `start_top_height`
    /// downwards until the timestamp window is full
    fn complete_timestamps(&self, start_top_height: u32, timestamps: &mut Vec<u64>) {
        let window = self.currency.timestamp_check_window();
        if timestamps.len() >= window {
            return;
        }
        let needed = window - timestamps.len();
        let summaries = self.store.summaries();
        let top = (start_top_height as usize).min(summaries.len().saturating_sub(1));
        let stop = top.saturating_sub(needed);
        let mut height = top;
        loop {
            if let Some(summary) = summaries.get(height) {
                timestamps.push(summary.timestamp);
            }
            if height == 0 {
                break;
            }
            height -= 1;
            if height == stop {
                break;
            }
        }
    }

    /// Difficulty for `entry` on top of `branch`, borrowing main-chain
    /// samples below the fork when the branch is short
    fn alternative_difficulty(&self, branch: &[Hash], entry: &BlockEntry) -> u64 {
        let count = self.currency.difficulty_blocks_count();
        let mut timestamps = Vec::new();
        let mut cumulative_difficulties = Vec::new();

        if branch.len() < count {
            let stop = branch
                .first()
                .and_then(|hash| self.alternative_chains.get(hash))
                .map_or(entry.height, |first| first.height) as usize;
            let main_count = (count - branch.len()).min(stop);
            // The genesis block never takes part
            let start = (stop - main_count).max(1);
            for summary in self.store.summaries().get(start..stop).unwrap_or_default() {
                timestamps.push(summary.timestamp);
                cumulative_difficulties.push(summary.cumulative_difficulty);
            }
        }

        let skip = branch.len().saturating_sub(count);
        for alt in branch[skip..].iter().filter_map(|hash| self.alternative_chains.get(hash)) {
            timestamps.push(alt.block.timestamp());
            cumulative_difficulties.push(alt.cumulative_difficulty);
        }
        self.currency.next_difficulty(timestamps, cumulative_difficulties)
    }

    /// Size of `block` from its coinbase and the transactions the pool or
    /// the main chain knows about
    fn block_cumulative_size(&self, pool: &dyn TransactionPool, block: &Block, hash: &Hash) -> u64 {
        let mut size = block.base_transaction.blob_size();
        let mut unknown = 0;
        for tx_hash in &block.transaction_hashes {
            if let Some(blob_size) = pool.transaction_blob_size(tx_hash) {
                size += blob_size;
            } else if let Some(index) = self.indices.transaction_map.get(tx_hash) {
                match self.store.get(index.block) {
                    Ok(entry) => {
                        size += entry
                            .transactions
                            .get(index.transaction as usize)
                            .map_or(0, |t| t.tx.blob_size());
                    }
                    Err(_) => unknown += 1,
                }
            } else {
                unknown += 1;
            }
        }
        if unknown > 0 {
            info!(block = %hash, unknown, "Block has unknown transactions, cumulative size is imprecise");
        }
        size
    }

    pub(crate) fn handle_alternative_block(
        &mut self,
        pool: &mut dyn TransactionPool,
        block: &Block,
        hash: &Hash,
        send_message: bool,
    ) -> Result<AlternativeOutcome, BlockError> {
        let block_height = block.height().unwrap_or(0);
        if block_height == 0 {
            return Err(BlockError::Coinbase("alternative block has a wrong miner transaction"));
        }
        if !self.checkpoints.is_alternative_block_allowed(self.height(), block_height) {
            info!(
                block = %hash,
                block_height,
                chain_height = self.height(),
                "Block can't be accepted for alternative chain"
            );
            return Err(BlockError::AlternativeNotAllowed(block_height));
        }
        self.check_block_version(block, block_height)?;
        self.check_parent_block_size(block)?;
        let size = self.block_cumulative_size(pool, block, hash);
        self.check_cumulative_block_size(size, block_height)?;

        let previous = block.previous_block_hash();
        let main_previous_height = self.indices.block_index.get_block_height(previous);
        let previous_alt = self.alternative_chains.get(previous).map(|e| (e.height, e.cumulative_difficulty));
        if main_previous_height.is_none() && previous_alt.is_none() {
            info!(block = %hash, "Block recognized as orphaned and rejected");
            return Ok(AlternativeOutcome::Orphaned);
        }

        let mut branch = self.alternative_branch(previous);
        let mut timestamps: Vec<u64> = branch
            .iter()
            .rev()
            .filter_map(|h| self.alternative_chains.get(h))
            .map(|e| e.block.timestamp())
            .collect();
        match branch.first().and_then(|h| self.alternative_chains.get(h)) {
            Some(first) => {
                let connection = first.height.checked_sub(1).filter(|h| *h < self.height());
                let connected = connection
                    .and_then(|h| self.indices.block_index.get_block_id(h))
                    .map_or(false, |id| id == *first.block.previous_block_hash());
                let Some(connection) = connection.filter(|_| connected) else {
                    error!(block = %hash, "Alternative chain has wrong connection to main chain");
                    return Err(BlockError::BrokenAlternativeChain);
                };
                self.complete_timestamps(connection, &mut timestamps);
            }
            None => {
                let Some(height) = main_previous_height else {
                    return Err(BlockError::BrokenAlternativeChain);
                };
                self.complete_timestamps(height, &mut timestamps);
            }
        }
        self.check_block_timestamp(timestamps, block)?;

        let height = match (previous_alt, main_previous_height) {
            (Some((alt_height, _)), _) => alt_height + 1,
            (None, Some(main_height)) => main_height + 1,
            (None, None) => return Err(BlockError::BrokenAlternativeChain),
        };
        let mut entry = BlockEntry {
            block: block.clone(),
            height,
            block_cumulative_size: size,
            cumulative_difficulty: 0,
            already_generated_coins: 0,
            transactions: Vec::new(),
        };

        let (valid, is_checkpoint) = self.checkpoints.check_block(height, hash);
        if !valid {
            return Err(BlockError::CheckpointMismatch(height));
        }

        // Alternative blocks always pay proof of work
        self.in_checkpoint_zone = false;
        let difficulty = self.alternative_difficulty(&branch, &entry);
        if difficulty == 0 {
            return Err(BlockError::DifficultyOverhead);
        }
        let (pow_valid, pow) = self.currency.check_proof_of_work(block, difficulty);
        if !pow_valid {
            info!(block = %hash, %pow, difficulty, "Alternative block has not enough proof of work");
            return Err(BlockError::ProofOfWork { hash: pow, difficulty });
        }
        self.prevalidate_miner_transaction(block, height)?;

        let base_difficulty = match (previous_alt, main_previous_height) {
            (Some((_, cumulative)), _) => cumulative,
            (None, Some(main_height)) => self
                .store
                .summary(main_height)
                .map_or(0, |s| s.cumulative_difficulty),
            (None, None) => 0,
        };
        entry.cumulative_difficulty = base_difficulty.saturating_add(difficulty);
        let cumulative_difficulty = entry.cumulative_difficulty;

        if self.alternative_chains.contains_key(hash) {
            return Err(BlockError::AlreadyExists(*hash));
        }
        self.alternative_chains.insert(*hash, entry);
        self.orphans.add(block);
        branch.push(*hash);

        let main_difficulty = self.store.last_summary().map_or(0, |s| s.cumulative_difficulty);
        if is_checkpoint {
            info!(height, chain_height = self.height(), "REORGANIZE: checkpoint found in alternative chain");
            self.switch_to_alternative_blockchain(pool, &branch, true)?;
            Ok(AlternativeOutcome::Switched)
        } else if main_difficulty < cumulative_difficulty {
            info!(
                height,
                chain_height = self.height(),
                main_difficulty,
                alternative_difficulty = cumulative_difficulty,
                branch_length = branch.len(),
                "REORGANIZE: alternative chain is heavier"
            );
            self.switch_to_alternative_blockchain(pool, &branch, false)?;
            Ok(AlternativeOutcome::Switched)
        } else {
            info!(height, block = %hash, %pow, difficulty, "Block added as alternative");
            if send_message {
                self.messages.send(&BlockchainMessage::NewAlternativeBlock(*hash));
            }
            Ok(AlternativeOutcome::Added)
        }
    }

    fn forget_alternative(&mut self, hash: &Hash) {
        if let Some(entry) = self.alternative_chains.remove(hash) {
            self.orphans.remove(&entry.block);
        }
    }

    /// Replace the main chain above the fork point with `branch`.
    ///
    /// `discard_disconnected` drops the replaced blocks instead of keeping
    /// them as an alternative branch.
    pub(crate) fn switch_to_alternative_blockchain(
        &mut self,
        pool: &mut dyn TransactionPool,
        branch: &[Hash],
        discard_disconnected: bool,
    ) -> Result<(), BlockError> {
        let split_height = branch
            .first()
            .and_then(|hash| self.alternative_chains.get(hash))
            .map(|entry| entry.height)
            .ok_or(BlockError::BrokenAlternativeChain)?;
        if self.height() <= split_height {
            error!(split_height, "Blockchain size is lower than split height");
            return Err(BlockError::BrokenAlternativeChain);
        }

        let mut disconnected = Vec::new();
        while self.height() > split_height {
            match self.pop_block(pool) {
                Ok(block) => disconnected.push(block),
                Err(e) => {
                    error!(height = self.height(), error = %e, "Failed to disconnect main chain block");
                    disconnected.reverse();
                    let height = self.height();
                    self.rollback_blockchain_switching(pool, &disconnected, height);
                    return Err(BlockError::Reorganization(Box::new(e)));
                }
            }
        }
        disconnected.reverse();

        for (position, hash) in branch.iter().enumerate() {
            let Some(block) = self.alternative_chains.get(hash).map(|e| e.block.clone()) else {
                self.rollback_blockchain_switching(pool, &disconnected, split_height);
                return Err(BlockError::BrokenAlternativeChain);
            };
            if let Err(e) = self.push_block(pool, &block, hash) {
                warn!(block = %hash, error = %e, "Failed to switch to alternative blockchain");
                self.rollback_blockchain_switching(pool, &disconnected, split_height);
                for failed in &branch[position..] {
                    self.forget_alternative(failed);
                }
                return Err(BlockError::Reorganization(Box::new(e)));
            }
        }

        if !discard_disconnected {
            for block in &disconnected {
                let hash = block.hash();
                if let Err(e) = self.handle_alternative_block(pool, block, &hash, false) {
                    error!(block = %hash, error = %e, "Failed to push ex-main chain block to alternative chain");
                    self.rollback_blockchain_switching(pool, &disconnected, split_height);
                    return Err(BlockError::Reorganization(Box::new(e)));
                }
            }
        }

        let mut hashes = Vec::with_capacity(branch.len() + 1);
        if let Some(root) = split_height
            .checked_sub(1)
            .and_then(|h| self.indices.block_index.get_block_id(h))
        {
            hashes.push(root);
        }
        for hash in branch {
            hashes.push(*hash);
            self.forget_alternative(hash);
        }
        self.messages.send(&BlockchainMessage::ChainSwitch { hashes });

        info!(split_height, chain_height = self.height(), "REORGANIZE SUCCESS");
        Ok(())
    }

    /// Pop everything above `rollback_height` and push `original` back
    fn rollback_blockchain_switching(&mut self, pool: &mut dyn TransactionPool, original: &[Block], rollback_height: u32) {
        while self.height() > rollback_height {
            if let Err(e) = self.pop_block(pool) {
                error!(error = %e, "Failed to pop block during rollback");
                return;
            }
        }
        for block in original {
            let hash = block.hash();
            if let Err(e) = self.push_block(pool, block, &hash) {
                error!(block = %hash, error = %e, "PANIC! Failed to add block again while rolling back a chain switch");
                return;
            }
        }
        info!(height = self.height(), "Rollback success");
    }

    /// Ids at power-of-two distances below the tail, then genesis
    pub(crate) fn build_sparse_chain(&self) -> Vec<Hash> {
        self.indices.block_index.build_sparse_chain(&self.tail_id())
    }

    /// Sparse chain from `start`, which may sit on an alternative branch.
    /// Branch ids come at distances 1, 2, 4, ... counting `start` as 1.
    pub(crate) fn build_sparse_chain_from(&self, start: &Hash) -> Vec<Hash> {
        if self.indices.block_index.has_block(start) {
            return self.indices.block_index.build_sparse_chain(start);
        }
        let Some(start_entry) = self.alternative_chains.get(start) else {
            return Vec::new();
        };

        let mut alternative = vec![*start];
        let mut cursor = *start_entry.block.previous_block_hash();
        while let Some(entry) = self.alternative_chains.get(&cursor) {
            alternative.push(cursor);
            cursor = *entry.block.previous_block_hash();
        }

        let mut ids = Vec::new();
        let mut distance = 1;
        while distance <= alternative.len() {
            ids.push(alternative[distance - 1]);
            distance *= 2;
        }
        ids.extend(self.indices.block_index.build_sparse_chain(&cursor));
        ids
    }
}
