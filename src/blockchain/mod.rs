//! Blockchain core
//!
//! [`Blockchain`] owns the main chain, the alternative chains and every
//! index derived from them. All state sits behind one mutex. Adding a
//! block also locks the transaction pool, always pool first and chain
//! second. Observers run after both locks are released.

mod alternative;
mod error;
mod inputs;
mod main_chain;
mod messages;
mod state;

pub use error::{BlockError, BlockVerificationContext, InitError, TxInputError};
pub use inputs::BlockInfo;
pub use messages::{BlockchainMessage, BlockchainObserver, MessageQueue, MessageQueueList};

use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::consensus::{Block, Checkpoints, Currency, UpgradeDetector};
use crate::constants::{BLOCK_MAJOR_VERSION_2, UNDEF_HEIGHT};
use crate::crypto::{Hash, KeyImage, PublicKey};
use crate::pool::TransactionPool;
use crate::storage::cache::CacheError;
use crate::storage::{BlockEntry, StorageError};
use crate::validation::{MultisignatureInput, Transaction, TransactionOutputTarget};

use alternative::AlternativeOutcome;
use messages::ObserverList;
use state::{unix_time, ChainState};

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A spendable output offered as a ring member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEntry {
    pub global_index: u32,
    pub key: PublicKey,
}

/// Main-chain ids a peer is missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockchainSupplement {
    pub total_height: u32,
    pub start_height: u32,
    pub block_ids: Vec<Hash>,
}

pub struct Blockchain {
    currency: Arc<Currency>,
    pool: Arc<Mutex<dyn TransactionPool>>,
    state: Mutex<ChainState>,
    observers: Mutex<ObserverList>,
}

impl Blockchain {
    /// Open the chain stored in `folder`.
    ///
    /// With `load_existing` the stored blocks are reused and the index
    /// caches loaded or rebuilt; otherwise the store is wiped. An empty
    /// store receives the genesis block.
    pub fn init(
        currency: Currency,
        pool: Arc<Mutex<dyn TransactionPool>>,
        checkpoints: Checkpoints,
        folder: &Path,
        load_existing: bool,
    ) -> Result<Self, InitError> {
        let currency = Arc::new(currency);
        let mut state = ChainState::open(Arc::clone(&currency), checkpoints, folder)?;

        if load_existing && !state.store.is_empty() {
            info!(path = %folder.display(), "Loading blockchain");
            state.load_caches()?;
        } else {
            state.store.clear()?;
        }

        let genesis_hash = currency.genesis_block_hash();
        if state.store.is_empty() {
            info!("Blockchain not loaded, generating genesis block");
            state
                .push_block_with_transactions(currency.genesis_block(), &genesis_hash, &[])
                .map_err(InitError::GenesisRejected)?;
        } else {
            let stored = state.store.summary(0).map(|s| s.hash).unwrap_or_default();
            if stored != genesis_hash {
                return Err(InitError::GenesisMismatch {
                    stored,
                    expected: genesis_hash,
                });
            }
        }

        if let Some(last_valid) = state.find_checkpoint_mismatch() {
            warn!(height = last_valid, "Invalid checkpoint found, rolling back to the last valid one");
            state
                .rollback_to(last_valid)
                .map_err(|e| InitError::Rollback(e.into()))?;
        }

        if !state.upgrade_detector.init(&state.store) {
            return Err(InitError::UpgradeDetector);
        }
        let upgrade_height = state.upgrade_detector.upgrade_height();
        if upgrade_height != UNDEF_HEIGHT {
            let after = state.store.summary(upgrade_height.saturating_add(1)).map(|s| s.major_version);
            if after.map_or(false, |version| version != BLOCK_MAJOR_VERSION_2) {
                warn!(
                    height = upgrade_height + 1,
                    version = ?after,
                    expected = BLOCK_MAJOR_VERSION_2,
                    "Invalid block version, rolling back"
                );
                state
                    .rollback_to(upgrade_height)
                    .map_err(|e| InitError::Rollback(e.into()))?;
                state.upgrade_detector = UpgradeDetector::new(&currency, BLOCK_MAJOR_VERSION_2);
                if !state.upgrade_detector.init(&state.store) {
                    return Err(InitError::UpgradeDetector);
                }
            }
        }

        state.update_next_cumulative_size_limit();
        let last_timestamp = state.store.last_summary().map_or(0, |s| s.timestamp);
        info!(
            height = state.height().saturating_sub(1),
            seconds_ago = unix_time().saturating_sub(last_timestamp),
            difficulty = state.difficulty_for_next_block(),
            "Blockchain initialized"
        );

        Ok(Self {
            currency,
            pool,
            state: Mutex::new(state),
            observers: Mutex::new(ObserverList::default()),
        })
    }

    /// Save the index caches and flush the block store
    pub fn deinit(&self) -> Result<(), CacheError> {
        self.store_cache()?;
        lock(&self.state).store.flush()?;
        Ok(())
    }

    pub fn store_cache(&self) -> Result<(), CacheError> {
        lock(&self.state).store_caches()
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Offer a block to the chain.
    ///
    /// Returns whether it was accepted along with what happened to it.
    /// Rejections never surface as errors; they are logged and flagged.
    pub fn add_new_block(&self, block: &Block) -> (bool, BlockVerificationContext) {
        let hash = block.hash();
        let mut context = BlockVerificationContext::default();

        let accepted = {
            let mut pool = lock(&self.pool);
            let mut state = lock(&self.state);

            if state.have_block(&hash) {
                debug!(block = %hash, "Block already exists");
                context.already_exists = true;
                return (false, context);
            }

            if *block.previous_block_hash() != state.tail_id() {
                match state.handle_alternative_block(&mut *pool, block, &hash, true) {
                    Ok(AlternativeOutcome::Orphaned) => {
                        context.marked_as_orphaned = true;
                        true
                    }
                    Ok(AlternativeOutcome::Added) => true,
                    Ok(AlternativeOutcome::Switched) => {
                        context.added_to_main_chain = true;
                        context.switched_to_alt_chain = true;
                        true
                    }
                    Err(e) => {
                        warn!(block = %hash, error = %e, "Alternative block rejected");
                        context.verification_failed = true;
                        false
                    }
                }
            } else {
                match state.push_block(&mut *pool, block, &hash) {
                    Ok(()) => {
                        context.added_to_main_chain = true;
                        state.messages.send(&BlockchainMessage::NewBlock(hash));
                        true
                    }
                    Err(e) => {
                        warn!(block = %hash, error = %e, "Block rejected");
                        context.verification_failed = true;
                        false
                    }
                }
            }
        };

        if accepted && context.added_to_main_chain {
            let observers = lock(&self.observers).snapshot();
            for observer in observers {
                observer.blockchain_updated();
            }
        }
        (accepted, context)
    }

    /// Drop main-chain blocks above `height`. Their transactions are not
    /// returned to the pool.
    pub fn rollback_blockchain_to(&self, height: u32) -> Result<(), StorageError> {
        lock(&self.state).rollback_to(height)
    }

    pub fn add_observer(&self, observer: Arc<dyn BlockchainObserver>) -> bool {
        lock(&self.observers).add(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn BlockchainObserver>) -> bool {
        lock(&self.observers).remove(observer)
    }

    pub fn add_message_queue(&self) -> MessageQueue {
        lock(&self.state).messages.add()
    }

    pub fn remove_message_queue(&self, queue: &MessageQueue) -> bool {
        lock(&self.state).messages.remove(queue.id())
    }

    /// Number of main-chain blocks
    pub fn get_current_blockchain_height(&self) -> u32 {
        lock(&self.state).height()
    }

    pub fn get_tail_id(&self) -> Hash {
        lock(&self.state).tail_id()
    }

    pub fn get_block_id_by_height(&self, height: u32) -> Option<Hash> {
        lock(&self.state).indices.block_index.get_block_id(height)
    }

    pub fn get_block_height(&self, hash: &Hash) -> Option<u32> {
        lock(&self.state).indices.block_index.get_block_height(hash)
    }

    /// Whether `hash` is on the main chain or an alternative one
    pub fn have_block(&self, hash: &Hash) -> bool {
        lock(&self.state).have_block(hash)
    }

    pub fn get_block_by_height(&self, height: u32) -> Option<Block> {
        lock(&self.state).store.get(height).ok().map(|e| e.block)
    }

    /// Main-chain or alternative block by id
    pub fn get_block_by_hash(&self, hash: &Hash) -> Option<Block> {
        let state = lock(&self.state);
        if let Some(height) = state.indices.block_index.get_block_height(hash) {
            return state.store.get(height).ok().map(|e| e.block);
        }
        state.alternative_chains.get(hash).map(|e| e.block.clone())
    }

    /// Up to `count` main-chain blocks from `start_height`
    pub fn get_blocks(&self, start_height: u32, count: u32) -> Vec<Block> {
        let state = lock(&self.state);
        let end = start_height.saturating_add(count).min(state.height());
        (start_height..end)
            .filter_map(|height| state.store.get(height).ok().map(|e| e.block))
            .collect()
    }

    pub fn get_alternative_blocks(&self) -> Vec<Block> {
        lock(&self.state)
            .alternative_chains
            .values()
            .map(|e| e.block.clone())
            .collect()
    }

    pub fn get_alternative_blocks_count(&self) -> usize {
        lock(&self.state).alternative_chains.len()
    }

    pub fn have_transaction(&self, hash: &Hash) -> bool {
        lock(&self.state).indices.transaction_map.contains_key(hash)
    }

    /// Main-chain transactions by id, with the ids not found
    pub fn get_transactions(&self, hashes: &[Hash]) -> (Vec<Transaction>, Vec<Hash>) {
        let state = lock(&self.state);
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for hash in hashes {
            match state
                .indices
                .transaction_map
                .get(hash)
                .and_then(|index| transaction_at(&state, index.block, index.transaction))
            {
                Some(tx) => found.push(tx),
                None => missed.push(*hash),
            }
        }
        (found, missed)
    }

    pub fn get_transaction_output_global_indexes(&self, hash: &Hash) -> Option<Vec<u32>> {
        let state = lock(&self.state);
        let index = state.indices.transaction_map.get(hash)?;
        let entry = state.store.get(index.block).ok()?;
        entry
            .transactions
            .get(index.transaction as usize)
            .map(|t| t.global_output_indexes.clone())
    }

    /// Up to `count` random unlocked key outputs of `amount`, skipping
    /// outputs younger than the mined-money unlock window
    pub fn get_random_outs_by_amount(&self, amount: u64, count: usize) -> Vec<OutputEntry> {
        let state = lock(&self.state);
        let Some(outputs) = state.indices.outputs.get(&amount) else {
            return Vec::new();
        };

        let window = self.currency.mined_money_unlock_window();
        let allowed = outputs
            .iter()
            .rposition(|(index, _)| index.block.saturating_add(window) <= state.height())
            .map_or(0, |last| last + 1);

        let mut candidates: Vec<usize> = (0..allowed).collect();
        candidates.shuffle(&mut rand::thread_rng());

        let mut result = Vec::new();
        for global_index in candidates {
            if result.len() >= count {
                break;
            }
            let (location, position) = outputs[global_index];
            let Some(tx) = transaction_at(&state, location.block, location.transaction) else {
                continue;
            };
            if !state.is_spend_time_unlocked(tx.prefix.unlock_time) {
                continue;
            }
            if let Some(TransactionOutputTarget::Key(output)) = tx.prefix.outputs.get(position as usize).map(|o| &o.target) {
                result.push(OutputEntry {
                    global_index: global_index as u32,
                    key: output.key,
                });
            }
        }
        result
    }

    /// Sparse list of main-chain ids from the tail down to genesis
    pub fn build_sparse_chain(&self) -> Vec<Hash> {
        lock(&self.state).build_sparse_chain()
    }

    /// Sparse list starting at `start`, which may be an alternative block
    pub fn build_sparse_chain_from(&self, start: &Hash) -> Vec<Hash> {
        lock(&self.state).build_sparse_chain_from(start)
    }

    /// Main-chain ids following the first of `remote_ids` we know.
    ///
    /// `remote_ids` is a peer's sparse chain and must end with our genesis.
    pub fn find_blockchain_supplement(&self, remote_ids: &[Hash], max_count: usize) -> Option<BlockchainSupplement> {
        let state = lock(&self.state);
        if remote_ids.last() != Some(&self.currency.genesis_block_hash()) {
            warn!("Peer sparse chain does not end with our genesis block");
            return None;
        }
        let start_height = state.indices.block_index.find_supplement(remote_ids)?;
        Some(BlockchainSupplement {
            total_height: state.height(),
            start_height,
            block_ids: state.indices.block_index.get_block_ids(start_height, max_count),
        })
    }

    /// Difficulty the block at `height` was mined at
    pub fn get_block_difficulty(&self, height: u32) -> Option<u64> {
        let state = lock(&self.state);
        let current = state.store.summary(height)?.cumulative_difficulty;
        let previous = match height.checked_sub(1) {
            Some(h) => state.store.summary(h)?.cumulative_difficulty,
            None => 0,
        };
        Some(current - previous)
    }

    pub fn get_block_cumulative_size(&self, height: u32) -> Option<u64> {
        lock(&self.state).store.summary(height).map(|s| s.block_cumulative_size)
    }

    /// Coins emitted up to and including the main-chain block `hash`
    pub fn get_already_generated_coins(&self, hash: &Hash) -> Option<u64> {
        let state = lock(&self.state);
        let height = state.indices.block_index.get_block_height(hash)?;
        state.store.summary(height).map(|s| s.already_generated_coins)
    }

    pub fn get_coins_in_circulation(&self) -> u64 {
        lock(&self.state)
            .store
            .last_summary()
            .map_or(0, |s| s.already_generated_coins)
    }

    /// Main-chain transactions, coinbases included
    pub fn get_total_transactions(&self) -> usize {
        lock(&self.state).indices.transaction_map.len()
    }

    /// Ids of main-chain blocks with timestamps in `[begin, end]`, at most
    /// `limit`, with the total count in range
    pub fn get_block_ids_by_timestamp(&self, begin: u64, end: u64, limit: usize) -> (Vec<Hash>, usize) {
        lock(&self.state).secondary.timestamps.find(begin, end, limit)
    }

    pub fn get_orphan_block_ids_by_height(&self, height: u32) -> Vec<Hash> {
        lock(&self.state).orphans.find(height)
    }

    /// Transactions in blocks `0..=height`, coinbases included
    pub fn get_generated_transactions_number(&self, height: u32) -> Option<u64> {
        lock(&self.state).secondary.generated_transactions.find(height)
    }

    pub fn get_transaction_ids_by_payment_id(&self, payment_id: &Hash) -> Vec<Hash> {
        lock(&self.state).secondary.payment_ids.find(payment_id)
    }

    pub fn have_tx_keyimg_as_spent(&self, key_image: &KeyImage) -> bool {
        lock(&self.state).indices.spent_keys.contains(key_image)
    }

    /// Transaction id and output position of the multisignature output
    /// `input` spends
    pub fn get_multisignature_output_reference(&self, input: &MultisignatureInput) -> Option<(Hash, u16)> {
        let state = lock(&self.state);
        let usage = state
            .indices
            .multisignature_outputs
            .get(&input.amount)?
            .get(input.output_index as usize)?;
        let tx = transaction_at(&state, usage.transaction_index.block, usage.transaction_index.transaction)?;
        Some((tx.hash(), usage.output_index))
    }

    pub fn get_difficulty_for_next_block(&self) -> u64 {
        lock(&self.state).difficulty_for_next_block()
    }

    pub fn get_current_cumulative_block_size_limit(&self) -> u64 {
        lock(&self.state).current_block_cumul_size_limit
    }

    pub fn get_block_major_version_for_height(&self, height: u32) -> u8 {
        lock(&self.state).block_major_version_for_height(height)
    }

    /// Cumulative sizes of up to `count` blocks ending at `from_height`
    pub fn get_backward_blocks_sizes(&self, from_height: u32, count: usize) -> Vec<u64> {
        lock(&self.state).backward_blocks_sizes(from_height, count)
    }

    /// Validate the inputs of `tx` against the main chain, returning the
    /// highest block it depends on
    pub fn check_transaction_inputs(&self, tx: &Transaction) -> Result<BlockInfo, TxInputError> {
        lock(&self.state).check_transaction_inputs_with_block(tx)
    }

    /// Memoized input check for transactions waiting in a pool
    pub fn check_transaction_inputs_cached(
        &self,
        tx: &Transaction,
        max_used_block: &mut BlockInfo,
        last_failed: &mut BlockInfo,
    ) -> bool {
        lock(&self.state).check_transaction_inputs_cached(tx, max_used_block, last_failed)
    }

    /// Full stored entry of the main-chain block at `height`
    pub fn get_block_entry(&self, height: u32) -> Result<BlockEntry, StorageError> {
        lock(&self.state).store.get(height)
    }
}

fn transaction_at(state: &ChainState, block: u32, transaction: u16) -> Option<Transaction> {
    let entry = state.store.get(block).ok()?;
    entry.transactions.into_iter().nth(transaction as usize).map(|t| t.tx)
}
