//! Consensus parameters
//!
//! `Currency` bundles every network constant with the pure functions the
//! chain core consumes: genesis block, version schedule, rewards,
//! difficulty, size ceilings and the proof-of-work check. It is built
//! from a `CurrencyBuilder`, which can be read from JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::*;
use crate::crypto::{check_hash, hash_bytes, tree_hash_from_branch, Hash, PublicKey, SecretKey};
use crate::validation::extra::{append_nonce, append_public_key, get_merge_mining_tag, ExtraError};
use crate::validation::{
    BaseInput, KeyOutput, Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget,
    TransactionPrefix,
};

use super::block::{Block, BlockHeader};
use super::difficulty::{next_difficulty, DifficultyWindow};
use super::rewards::{base_reward, decompose_amount, get_block_reward, BlockReward};

const GENESIS_KEY_SEED: &[u8] = b"cryptonote genesis coinbase";

#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("Invalid currency parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("Block is too big for any reward")]
    BlockTooBig,
    #[error("Invalid genesis key")]
    GenesisKey,
    #[error("Invalid extra: {0}")]
    Extra(#[from] ExtraError),
}

/// Inputs of the reward function for one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardContext {
    pub major_version: u8,
    /// Median size of the last reward window blocks
    pub median_size: u64,
    pub current_block_size: u64,
    pub already_generated_coins: u64,
    pub fee: u64,
}

/// Network parameters with protocol defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyBuilder {
    pub max_block_number: u64,
    pub max_tx_size: u64,
    pub mined_money_unlock_window: u32,
    pub timestamp_check_window: usize,
    pub block_future_time_limit: u64,

    pub money_supply: u64,
    pub emission_speed_factor: u32,

    pub reward_blocks_window: usize,
    pub block_granted_full_reward_zone: u64,
    pub block_granted_full_reward_zone_v1: u64,
    pub miner_tx_blob_reserved_size: u64,

    pub difficulty_target: u64,
    pub difficulty_window: usize,
    pub difficulty_cut: usize,
    pub difficulty_lag: usize,

    pub max_block_size_initial: u64,
    pub max_block_size_growth_speed_numerator: u64,
    pub max_block_size_growth_speed_denominator: u64,

    pub locked_tx_allowed_delta_seconds: u64,
    pub locked_tx_allowed_delta_blocks: u32,
    pub default_dust_threshold: u64,

    /// Fixed height of the v2 upgrade, or `UNDEF_HEIGHT` to vote for it
    pub upgrade_height_v2: u32,
    pub upgrade_voting_threshold: u32,
    pub upgrade_voting_window: u32,
    pub upgrade_window: u32,

    pub max_parent_block_size: u64,

    pub genesis_timestamp: u64,
    pub genesis_nonce: u32,

    pub blocks_file_name: String,
    pub blocks_cache_file_name: String,
    pub blockchain_indices_file_name: String,

    pub testnet: bool,
}

impl Default for CurrencyBuilder {
    fn default() -> Self {
        Self {
            max_block_number: MAX_BLOCK_NUMBER,
            max_tx_size: MAX_TX_SIZE,
            mined_money_unlock_window: MINED_MONEY_UNLOCK_WINDOW,
            timestamp_check_window: TIMESTAMP_CHECK_WINDOW,
            block_future_time_limit: BLOCK_FUTURE_TIME_LIMIT,
            money_supply: MONEY_SUPPLY,
            emission_speed_factor: EMISSION_SPEED_FACTOR,
            reward_blocks_window: REWARD_BLOCKS_WINDOW,
            block_granted_full_reward_zone: BLOCK_GRANTED_FULL_REWARD_ZONE,
            block_granted_full_reward_zone_v1: BLOCK_GRANTED_FULL_REWARD_ZONE_V1,
            miner_tx_blob_reserved_size: COINBASE_BLOB_RESERVED_SIZE,
            difficulty_target: DIFFICULTY_TARGET,
            difficulty_window: DIFFICULTY_WINDOW,
            difficulty_cut: DIFFICULTY_CUT,
            difficulty_lag: DIFFICULTY_LAG,
            max_block_size_initial: MAX_BLOCK_SIZE_INITIAL,
            max_block_size_growth_speed_numerator: MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR,
            max_block_size_growth_speed_denominator: MAX_BLOCK_SIZE_GROWTH_SPEED_DENOMINATOR,
            locked_tx_allowed_delta_seconds: LOCKED_TX_ALLOWED_DELTA_SECONDS,
            locked_tx_allowed_delta_blocks: LOCKED_TX_ALLOWED_DELTA_BLOCKS,
            default_dust_threshold: DEFAULT_DUST_THRESHOLD,
            upgrade_height_v2: UNDEF_HEIGHT,
            upgrade_voting_threshold: UPGRADE_VOTING_THRESHOLD,
            upgrade_voting_window: UPGRADE_VOTING_WINDOW,
            upgrade_window: UPGRADE_WINDOW,
            max_parent_block_size: MAX_PARENT_BLOCK_SIZE,
            genesis_timestamp: GENESIS_TIMESTAMP,
            genesis_nonce: GENESIS_NONCE,
            blocks_file_name: BLOCKS_FILENAME.to_string(),
            blocks_cache_file_name: BLOCKS_CACHE_FILENAME.to_string(),
            blockchain_indices_file_name: BLOCKCHAIN_INDICES_FILENAME.to_string(),
            testnet: false,
        }
    }
}

impl CurrencyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read parameters from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn upgrade_height_v2(mut self, height: u32) -> Self {
        self.upgrade_height_v2 = height;
        self
    }

    pub fn difficulty_target(mut self, seconds: u64) -> Self {
        self.difficulty_target = seconds;
        self
    }

    pub fn mined_money_unlock_window(mut self, blocks: u32) -> Self {
        self.mined_money_unlock_window = blocks;
        self
    }

    pub fn upgrade_voting(mut self, threshold: u32, voting_window: u32, upgrade_window: u32) -> Self {
        self.upgrade_voting_threshold = threshold;
        self.upgrade_voting_window = voting_window;
        self.upgrade_window = upgrade_window;
        self
    }

    /// Validate the parameters and assemble the genesis block
    pub fn build(self) -> Result<Currency, CurrencyError> {
        if self.difficulty_window < 2 {
            return Err(CurrencyError::InvalidParameter("difficulty_window"));
        }
        if 2 * self.difficulty_cut > self.difficulty_window - 2 {
            return Err(CurrencyError::InvalidParameter("difficulty_cut"));
        }
        if self.difficulty_target == 0 {
            return Err(CurrencyError::InvalidParameter("difficulty_target"));
        }
        if self.upgrade_voting_threshold == 0 || self.upgrade_voting_threshold > 100 {
            return Err(CurrencyError::InvalidParameter("upgrade_voting_threshold"));
        }
        if self.upgrade_voting_window <= 1 {
            return Err(CurrencyError::InvalidParameter("upgrade_voting_window"));
        }
        if self.max_block_size_growth_speed_denominator == 0 {
            return Err(CurrencyError::InvalidParameter("max_block_size_growth_speed_denominator"));
        }
        if self.emission_speed_factor == 0 || self.emission_speed_factor >= 64 {
            return Err(CurrencyError::InvalidParameter("emission_speed_factor"));
        }

        let mut params = self;
        if params.testnet {
            params.genesis_nonce = params.genesis_nonce.wrapping_add(1);
            params.blocks_file_name = format!("testnet_{}", params.blocks_file_name);
            params.blocks_cache_file_name = format!("testnet_{}", params.blocks_cache_file_name);
            params.blockchain_indices_file_name =
                format!("testnet_{}", params.blockchain_indices_file_name);
        }

        let header = BlockHeader {
            major_version: BLOCK_MAJOR_VERSION_1,
            minor_version: BLOCK_MINOR_VERSION_0,
            nonce: params.genesis_nonce,
            timestamp: params.genesis_timestamp,
            previous_block_hash: Hash::zero(),
        };
        let empty = Transaction::new(
            TransactionPrefix {
                version: CURRENT_TRANSACTION_VERSION,
                unlock_time: 0,
                inputs: vec![],
                outputs: vec![],
                extra: vec![],
            },
            vec![],
        );
        let mut currency = Currency {
            params,
            genesis_block: Block::new(header, empty, vec![]),
            genesis_block_hash: Hash::zero(),
        };
        currency.genesis_block.base_transaction = currency.genesis_coinbase()?;
        currency.genesis_block_hash = currency.genesis_block.hash();
        Ok(currency)
    }
}

/// Consensus parameters and functions of one network
#[derive(Debug, Clone)]
pub struct Currency {
    params: CurrencyBuilder,
    genesis_block: Block,
    genesis_block_hash: Hash,
}

impl Currency {
    pub fn params(&self) -> &CurrencyBuilder {
        &self.params
    }

    pub fn genesis_block(&self) -> &Block {
        &self.genesis_block
    }

    pub fn genesis_block_hash(&self) -> Hash {
        self.genesis_block_hash
    }

    pub fn is_testnet(&self) -> bool {
        self.params.testnet
    }

    pub fn max_block_number(&self) -> u64 {
        self.params.max_block_number
    }

    pub fn mined_money_unlock_window(&self) -> u32 {
        self.params.mined_money_unlock_window
    }

    pub fn timestamp_check_window(&self) -> usize {
        self.params.timestamp_check_window
    }

    pub fn block_future_time_limit(&self) -> u64 {
        self.params.block_future_time_limit
    }

    pub fn reward_blocks_window(&self) -> usize {
        self.params.reward_blocks_window
    }

    pub fn max_parent_block_size(&self) -> u64 {
        self.params.max_parent_block_size
    }

    pub fn money_supply(&self) -> u64 {
        self.params.money_supply
    }

    pub fn difficulty_target(&self) -> u64 {
        self.params.difficulty_target
    }

    pub fn difficulty_window(&self) -> DifficultyWindow {
        DifficultyWindow {
            window: self.params.difficulty_window,
            cut: self.params.difficulty_cut,
            lag: self.params.difficulty_lag,
            target: self.params.difficulty_target,
        }
    }

    /// Samples needed by `next_difficulty`
    pub fn difficulty_blocks_count(&self) -> usize {
        self.difficulty_window().blocks_count()
    }

    pub fn upgrade_voting_threshold(&self) -> u32 {
        self.params.upgrade_voting_threshold
    }

    pub fn upgrade_voting_window(&self) -> u32 {
        self.params.upgrade_voting_window
    }

    pub fn upgrade_window(&self) -> u32 {
        self.params.upgrade_window
    }

    /// Farthest a voted upgrade may lie beyond the chain tip
    pub fn max_upgrade_distance(&self) -> u32 {
        self.params.upgrade_window.saturating_mul(7)
    }

    /// Height the upgrade happens at once voting completed at `voting_complete_height`
    pub fn calculate_upgrade_height(&self, voting_complete_height: u32) -> u32 {
        voting_complete_height.saturating_add(self.params.upgrade_window)
    }

    /// Fixed upgrade height to `major_version`, `UNDEF_HEIGHT` when voted
    pub fn upgrade_height(&self, major_version: u8) -> u32 {
        match major_version {
            BLOCK_MAJOR_VERSION_2 => self.params.upgrade_height_v2,
            _ => UNDEF_HEIGHT,
        }
    }

    pub fn blocks_file_name(&self) -> &str {
        &self.params.blocks_file_name
    }

    pub fn blocks_cache_file_name(&self) -> &str {
        &self.params.blocks_cache_file_name
    }

    pub fn blockchain_indices_file_name(&self) -> &str {
        &self.params.blockchain_indices_file_name
    }

    pub fn block_granted_full_reward_zone_by_block_version(&self, major_version: u8) -> u64 {
        if major_version >= BLOCK_MAJOR_VERSION_2 {
            self.params.block_granted_full_reward_zone
        } else {
            self.params.block_granted_full_reward_zone_v1
        }
    }

    /// Absolute ceiling on a block's cumulative size at `height`
    pub fn max_block_cumulative_size(&self, height: u64) -> u64 {
        let growth = height as u128 * self.params.max_block_size_growth_speed_numerator as u128
            / self.params.max_block_size_growth_speed_denominator as u128;
        let size = self.params.max_block_size_initial as u128 + growth;
        size.min(u64::MAX as u128) as u64
    }

    /// Reward and emission change, `None` when the block is too big
    pub fn get_block_reward(&self, context: &RewardContext) -> Option<BlockReward> {
        let base = base_reward(
            self.params.money_supply,
            context.already_generated_coins,
            self.params.emission_speed_factor,
        );
        get_block_reward(
            base,
            self.block_granted_full_reward_zone_by_block_version(context.major_version),
            context.median_size,
            context.current_block_size,
            context.fee,
            context.major_version >= BLOCK_MAJOR_VERSION_2,
        )
    }

    pub fn next_difficulty(&self, timestamps: Vec<u64>, cumulative_difficulties: Vec<u64>) -> u64 {
        next_difficulty(&self.difficulty_window(), timestamps, cumulative_difficulties)
    }

    /// Whether an output with `unlock_time` may be spent on a chain of
    /// `chain_height` blocks at unix time `now`
    pub fn is_unlocked(&self, unlock_time: u64, chain_height: u32, now: u64) -> bool {
        if unlock_time < self.params.max_block_number {
            let current = (chain_height as u64).saturating_sub(1) + self.params.locked_tx_allowed_delta_blocks as u64;
            current >= unlock_time
        } else {
            now + self.params.locked_tx_allowed_delta_seconds >= unlock_time
        }
    }

    /// Check proof of work against `difficulty`, returning the hash checked.
    ///
    /// Merge-mined blocks also have to be committed to by the parent
    /// coinbase's merge-mining tag.
    pub fn check_proof_of_work(&self, block: &Block, difficulty: u64) -> (bool, Hash) {
        let pow = block.proof_of_work_hash();
        if !check_hash(&pow, difficulty) {
            return (false, pow);
        }

        let parent = match (&block.parent_block, block.major_version() >= BLOCK_MAJOR_VERSION_2) {
            (_, false) => return (true, pow),
            (Some(parent), true) => parent,
            (None, true) => return (false, pow),
        };

        let tag = match get_merge_mining_tag(&parent.base_transaction.prefix.extra) {
            Some(tag) => tag,
            None => return (false, pow),
        };
        if parent.blockchain_branch.len() > 8 * std::mem::size_of::<Hash>() {
            return (false, pow);
        }

        let root = tree_hash_from_branch(
            &parent.blockchain_branch,
            &block.aux_header_hash(),
            Some(&self.genesis_block_hash),
        );
        (root == tag.merkle_root, pow)
    }

    /// Build a coinbase paying the block reward to `miner_key`.
    ///
    /// The reward is split into denominations and merged back down to at
    /// most `max_outs` outputs.
    pub fn construct_miner_tx(
        &self,
        height: u32,
        context: &RewardContext,
        miner_key: &PublicKey,
        extra_nonce: &[u8],
        max_outs: usize,
    ) -> Result<Transaction, CurrencyError> {
        if max_outs == 0 {
            return Err(CurrencyError::InvalidParameter("max_outs"));
        }

        let mut extra = Vec::new();
        append_public_key(&mut extra, miner_key);
        if !extra_nonce.is_empty() {
            append_nonce(&mut extra, extra_nonce)?;
        }

        let reward = self
            .get_block_reward(context)
            .ok_or(CurrencyError::BlockTooBig)?;

        let mut amounts = decompose_amount(reward.reward, self.params.default_dust_threshold);
        while amounts.len() > max_outs {
            if let Some(last) = amounts.pop() {
                if let Some(prev) = amounts.last_mut() {
                    *prev += last;
                }
            }
        }

        let outputs = amounts
            .into_iter()
            .map(|amount| TransactionOutput {
                amount,
                target: TransactionOutputTarget::Key(KeyOutput { key: *miner_key }),
            })
            .collect();

        Ok(Transaction::new(
            TransactionPrefix {
                version: CURRENT_TRANSACTION_VERSION,
                unlock_time: height as u64 + self.params.mined_money_unlock_window as u64,
                inputs: vec![TransactionInput::Base(BaseInput { block_index: height })],
                outputs,
                extra,
            },
            vec![],
        ))
    }

    fn genesis_coinbase(&self) -> Result<Transaction, CurrencyError> {
        let key = SecretKey::from_bytes(&hash_bytes(GENESIS_KEY_SEED).0)
            .map_err(|_| CurrencyError::GenesisKey)?
            .public_key();

        self.construct_miner_tx(
            0,
            &RewardContext {
                major_version: BLOCK_MAJOR_VERSION_1,
                median_size: 0,
                current_block_size: 0,
                already_generated_coins: 0,
                fee: 0,
            },
            &key,
            &[],
            1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::consensus::ParentBlock;
    use crate::validation::extra::{append_merge_mining_tag, MergeMiningTag};

    fn currency() -> Currency {
        CurrencyBuilder::new().build().unwrap()
    }

    fn context(size: u64, generated: u64, fee: u64) -> RewardContext {
        RewardContext {
            major_version: BLOCK_MAJOR_VERSION_1,
            median_size: 0,
            current_block_size: size,
            already_generated_coins: generated,
            fee,
        }
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = currency();
        let b = currency();
        assert_eq!(a.genesis_block_hash(), b.genesis_block_hash());
        assert_eq!(a.genesis_block().height(), Some(0));

        let testnet = CurrencyBuilder::new().testnet(true).build().unwrap();
        assert_ne!(testnet.genesis_block_hash(), a.genesis_block_hash());
        assert!(testnet.blocks_cache_file_name().starts_with("testnet_"));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut builder = CurrencyBuilder::new();
        builder.difficulty_window = 1;
        assert!(builder.build().is_err());

        let builder = CurrencyBuilder::new().upgrade_voting(0, 10, 10);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_builder_from_json_keeps_defaults() {
        let builder = CurrencyBuilder::from_json(r#"{"difficulty_target": 60, "testnet": true}"#).unwrap();
        assert_eq!(builder.difficulty_target, 60);
        assert!(builder.testnet);
        assert_eq!(builder.difficulty_window, DIFFICULTY_WINDOW);
    }

    #[test]
    fn test_miner_tx_pays_exact_reward() {
        let currency = currency();
        let key = KeyPair::generate().public_key;
        let ctx = context(500, 0, 1_000);
        let tx = currency.construct_miner_tx(5, &ctx, &key, b"nonce", 3).unwrap();

        let expected = currency.get_block_reward(&ctx).unwrap().reward;
        assert_eq!(tx.output_amount(), expected);
        assert!(tx.prefix.outputs.len() <= 3);
        assert_eq!(tx.coinbase_height(), Some(5));
        assert_eq!(tx.prefix.unlock_time, 5 + MINED_MONEY_UNLOCK_WINDOW as u64);
    }

    #[test]
    fn test_unlock_rules() {
        let currency = currency();
        // Height-based: chain of 10 blocks unlocks up to height 10
        assert!(currency.is_unlocked(10, 10, 0));
        assert!(!currency.is_unlocked(11, 10, 0));
        // Time-based
        let t = MAX_BLOCK_NUMBER + 1_000;
        assert!(currency.is_unlocked(t, 1, t));
        assert!(!currency.is_unlocked(t, 1, t - LOCKED_TX_ALLOWED_DELTA_SECONDS - 1));
    }

    #[test]
    fn test_max_block_cumulative_size_grows() {
        let currency = currency();
        assert_eq!(currency.max_block_cumulative_size(0), MAX_BLOCK_SIZE_INITIAL);
        assert!(currency.max_block_cumulative_size(1_000_000) > MAX_BLOCK_SIZE_INITIAL);
    }

    #[test]
    fn test_v1_proof_of_work_at_difficulty_one() {
        let currency = currency();
        let (ok, hash) = currency.check_proof_of_work(currency.genesis_block(), 1);
        assert!(ok);
        assert_eq!(hash, currency.genesis_block().proof_of_work_hash());
    }

    #[test]
    fn test_merge_mined_proof_of_work() {
        let currency = currency();
        let mut block = currency.genesis_block().clone();
        block.header.major_version = BLOCK_MAJOR_VERSION_2;
        block.header.previous_block_hash = currency.genesis_block_hash();

        let mut parent_coinbase = currency.genesis_block().base_transaction.clone();
        let tag = MergeMiningTag { depth: 0, merkle_root: block.aux_header_hash() };
        append_merge_mining_tag(&mut parent_coinbase.prefix.extra, &tag);
        block.parent_block = Some(ParentBlock {
            major_version: 1,
            minor_version: 0,
            previous_block_hash: Hash::zero(),
            transaction_count: 1,
            base_transaction_branch: vec![],
            base_transaction: parent_coinbase,
            blockchain_branch: vec![],
        });
        assert!(currency.check_proof_of_work(&block, 1).0);

        // Committing to another block fails
        block.header.timestamp += 1;
        assert!(!currency.check_proof_of_work(&block, 1).0);

        block.parent_block = None;
        assert!(!currency.check_proof_of_work(&block, 1).0);
    }
}
