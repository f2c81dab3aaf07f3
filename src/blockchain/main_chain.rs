//! Main-chain block acceptance and removal

use tracing::{debug, info, warn};

use crate::consensus::{Block, RewardContext};
use crate::crypto::Hash;
use crate::pool::TransactionPool;
use crate::storage::{BlockEntry, TransactionEntry, TransactionIndex};
use crate::validation::{Transaction, TransactionInput};

use super::error::BlockError;
use super::state::{median, unix_time, ChainState};

/// Hand `transactions` back to the pool, last first
pub(crate) fn save_transactions(pool: &mut dyn TransactionPool, transactions: Vec<Transaction>) {
    for tx in transactions.into_iter().rev() {
        let hash = tx.hash();
        if !pool.add(tx, true) {
            warn!(tx = %hash, "Failed to return transaction to the pool");
        }
    }
}

/// Index of the `position`-th regular transaction; the coinbase takes slot 0
fn transaction_index(height: u32, position: usize) -> Result<TransactionIndex, BlockError> {
    let transaction = position
        .checked_add(1)
        .and_then(|slot| u16::try_from(slot).ok())
        .ok_or(BlockError::TooManyTransactions(position))?;
    Ok(TransactionIndex { block: height, transaction })
}

impl ChainState {
    pub(crate) fn check_block_version(&self, block: &Block, height: u32) -> Result<(), BlockError> {
        let expected = self.block_major_version_for_height(height);
        if block.major_version() != expected {
            return Err(BlockError::WrongVersion {
                expected,
                found: block.major_version(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_parent_block_size(&self, block: &Block) -> Result<(), BlockError> {
        let size = block.parent_block_size();
        if size > self.currency.max_parent_block_size() {
            return Err(BlockError::ParentBlockTooBig(size));
        }
        Ok(())
    }

    pub(crate) fn check_cumulative_block_size(&self, size: u64, height: u32) -> Result<(), BlockError> {
        let limit = self.currency.max_block_cumulative_size(height as u64);
        if size > limit {
            return Err(BlockError::BlockTooBig { size, limit });
        }
        Ok(())
    }

    /// Timestamp must not be below the median of the window before it.
    /// Fewer samples than the window accept anything.
    pub(crate) fn check_block_timestamp(&self, timestamps: Vec<u64>, block: &Block) -> Result<(), BlockError> {
        if timestamps.len() < self.currency.timestamp_check_window() {
            return Ok(());
        }
        let median = median(timestamps);
        if block.timestamp() < median {
            return Err(BlockError::TimestampTooOld {
                timestamp: block.timestamp(),
                median,
            });
        }
        Ok(())
    }

    fn check_block_timestamp_main(&self, block: &Block) -> Result<(), BlockError> {
        if block.timestamp() > unix_time() + self.currency.block_future_time_limit() {
            return Err(BlockError::TimestampInFuture {
                timestamp: block.timestamp(),
            });
        }
        let summaries = self.store.summaries();
        let start = summaries.len().saturating_sub(self.currency.timestamp_check_window());
        let timestamps = summaries[start..].iter().map(|s| s.timestamp).collect();
        self.check_block_timestamp(timestamps, block)
    }

    /// Coinbase shape: one base input for `height`, no signatures, the
    /// mined-money lock and no overflowing outputs
    pub(crate) fn prevalidate_miner_transaction(&self, block: &Block, height: u32) -> Result<(), BlockError> {
        let tx = &block.base_transaction;
        if tx.prefix.inputs.len() != 1 {
            return Err(BlockError::Coinbase("coinbase must have exactly one input"));
        }
        if !tx.signatures.is_empty() {
            return Err(BlockError::Coinbase("coinbase must not have signatures"));
        }
        match &tx.prefix.inputs[0] {
            TransactionInput::Base(input) if input.block_index == height => {}
            TransactionInput::Base(_) => return Err(BlockError::Coinbase("coinbase height mismatch")),
            _ => return Err(BlockError::Coinbase("coinbase input has the wrong type")),
        }
        if tx.prefix.unlock_time != height as u64 + self.currency.mined_money_unlock_window() as u64 {
            return Err(BlockError::Coinbase("coinbase has the wrong unlock time"));
        }
        if !tx.check_outputs_overflow() {
            return Err(BlockError::Coinbase("coinbase outputs overflow"));
        }
        Ok(())
    }

    /// Check the coinbase pays exactly the reward; returns the emission change
    fn validate_miner_transaction(
        &self,
        block: &Block,
        height: u32,
        cumulative_size: u64,
        already_generated_coins: u64,
        fee: u64,
    ) -> Result<i64, BlockError> {
        let context = RewardContext {
            major_version: self.block_major_version_for_height(height),
            median_size: median(self.last_blocks_sizes(self.currency.reward_blocks_window())),
            current_block_size: cumulative_size,
            already_generated_coins,
            fee,
        };
        let reward = self
            .currency
            .get_block_reward(&context)
            .ok_or(BlockError::RewardUnavailable)?;

        let paid = block.base_transaction.output_amount();
        if paid != reward.reward {
            return Err(BlockError::WrongReward {
                expected: reward.reward,
                found: paid,
            });
        }
        Ok(reward.emission_change)
    }

    /// Take the block's transactions out of the pool. On a miss everything
    /// taken so far goes back.
    fn load_transactions(&self, pool: &mut dyn TransactionPool, block: &Block) -> Result<Vec<Transaction>, BlockError> {
        let mut transactions = Vec::with_capacity(block.transaction_hashes.len());
        for hash in &block.transaction_hashes {
            match pool.take(hash) {
                Some(entry) => transactions.push(entry.tx),
                None => {
                    save_transactions(pool, transactions);
                    return Err(BlockError::TransactionMissing(*hash));
                }
            }
        }
        Ok(transactions)
    }

    /// Append `block` to the main chain, pulling its transactions from the
    /// pool. A rejected block leaves chain and pool as they were.
    pub(crate) fn push_block(
        &mut self,
        pool: &mut dyn TransactionPool,
        block: &Block,
        hash: &Hash,
    ) -> Result<(), BlockError> {
        let transactions = self.load_transactions(pool, block)?;
        if let Err(e) = self.push_block_with_transactions(block, hash, &transactions) {
            save_transactions(pool, transactions);
            return Err(e);
        }
        Ok(())
    }

    /// Append `block` whose transactions are already resolved
    pub(crate) fn push_block_with_transactions(
        &mut self,
        block: &Block,
        hash: &Hash,
        transactions: &[Transaction],
    ) -> Result<(), BlockError> {
        if self.indices.block_index.has_block(hash) {
            return Err(BlockError::AlreadyExists(*hash));
        }
        let height = self.height();
        self.check_block_version(block, height)?;
        self.check_parent_block_size(block)?;
        if *block.previous_block_hash() != self.tail_id() {
            return Err(BlockError::PreviousMismatch);
        }
        self.check_block_timestamp_main(block)?;

        let difficulty = self.difficulty_for_next_block();
        if difficulty == 0 {
            return Err(BlockError::DifficultyOverhead);
        }

        self.in_checkpoint_zone = self.checkpoints.is_in_checkpoint_zone(height);
        if self.in_checkpoint_zone {
            if let (false, _) = self.checkpoints.check_block(height, hash) {
                return Err(BlockError::CheckpointMismatch(height));
            }
        } else {
            let (valid, pow) = self.currency.check_proof_of_work(block, difficulty);
            if !valid {
                return Err(BlockError::ProofOfWork { hash: pow, difficulty });
            }
        }

        self.prevalidate_miner_transaction(block, height)?;

        let coinbase_hash = block.base_transaction.hash();
        let mut coinbase = TransactionEntry {
            tx: block.base_transaction.clone(),
            global_output_indexes: Vec::new(),
        };
        self.push_transaction(coinbase_hash, TransactionIndex { block: height, transaction: 0 }, &mut coinbase)?;

        let mut entry = BlockEntry {
            block: block.clone(),
            height,
            block_cumulative_size: block.base_transaction.blob_size(),
            cumulative_difficulty: difficulty,
            already_generated_coins: 0,
            transactions: vec![coinbase],
        };

        let mut fee_summary = 0u64;
        for (position, (tx, tx_hash)) in transactions.iter().zip(&block.transaction_hashes).enumerate() {
            let pushed = self.check_transaction_inputs(tx).map_err(|reason| {
                info!(block = %hash, tx = %tx_hash, error = %reason, "Block has a transaction with wrong inputs");
                BlockError::TransactionInputs { tx: *tx_hash, reason }
            });
            let pushed = pushed.and_then(|_| {
                let mut transaction = TransactionEntry {
                    tx: tx.clone(),
                    global_output_indexes: Vec::new(),
                };
                let index = transaction_index(height, position)?;
                self.push_transaction(*tx_hash, index, &mut transaction)?;
                Ok(transaction)
            });
            match pushed {
                Ok(transaction) => {
                    entry.block_cumulative_size += tx.blob_size();
                    fee_summary = fee_summary.saturating_add(tx.fee());
                    entry.transactions.push(transaction);
                }
                Err(e) => {
                    self.pop_transactions(&entry);
                    return Err(e);
                }
            }
        }

        let size_checked = self
            .check_cumulative_block_size(entry.block_cumulative_size, height)
            .and_then(|_| {
                if entry.block_cumulative_size > self.current_block_cumul_size_limit {
                    return Err(BlockError::BlockTooBig {
                        size: entry.block_cumulative_size,
                        limit: self.current_block_cumul_size_limit,
                    });
                }
                Ok(())
            });
        if let Err(e) = size_checked {
            self.pop_transactions(&entry);
            return Err(e);
        }

        let previous = self.store.last_summary().copied();
        let already_generated_coins = previous.map_or(0, |s| s.already_generated_coins);
        let emission_change = match self.validate_miner_transaction(
            block,
            height,
            entry.block_cumulative_size,
            already_generated_coins,
            fee_summary,
        ) {
            Ok(change) => change,
            Err(e) => {
                info!(block = %hash, error = %e, "Block has invalid miner transaction");
                self.pop_transactions(&entry);
                return Err(e);
            }
        };

        entry.already_generated_coins = (already_generated_coins as i128 + emission_change as i128)
            .clamp(0, u64::MAX as i128) as u64;
        if let Some(previous) = previous {
            entry.cumulative_difficulty = entry.cumulative_difficulty.saturating_add(previous.cumulative_difficulty);
        }

        if let Err(e) = self.store.push(&entry) {
            self.pop_transactions(&entry);
            return Err(e.into());
        }
        self.indices.block_index.push(*hash);
        self.index_block_secondary(block, *hash);

        info!(
            height,
            block = %hash,
            difficulty,
            size = entry.block_cumulative_size,
            transactions = entry.transactions.len(),
            "Block added to main chain"
        );

        self.update_next_cumulative_size_limit();
        self.upgrade_detector.block_pushed(&self.store);
        Ok(())
    }

    /// Remove the tip, returning its transactions to the pool
    pub(crate) fn pop_block(&mut self, pool: &mut dyn TransactionPool) -> Result<Block, BlockError> {
        let entry = self.remove_last_block()?;
        let transactions = entry.transactions.into_iter().skip(1).map(|t| t.tx).collect();
        save_transactions(pool, transactions);
        self.upgrade_detector.block_popped(&self.store);
        self.update_next_cumulative_size_limit();
        debug!(height = entry.height, "Block popped");
        Ok(entry.block)
    }
}
