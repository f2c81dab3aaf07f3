//! CryptoNote full-node core
//!
//! The blockchain state machine and consensus engine: block and
//! transaction acceptance, alternative chains and reorganization, the
//! global output and key-image indices, and their on-disk caches.
//!
//! Networking, RPC, mining and wallets sit outside this crate and reach
//! the core through [`blockchain::Blockchain`], the [`pool::TransactionPool`]
//! trait and the message queues.

pub mod blockchain;
pub mod consensus;
pub mod crypto;
pub mod pool;
pub mod storage;
pub mod validation;

pub use blockchain::{Blockchain, BlockVerificationContext};
pub use consensus::{Block, Currency, CurrencyBuilder};

/// Protocol constants; defaults for [`CurrencyBuilder`]
pub mod constants {
    /// Unlock times below this are block heights, above it unix times
    pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

    /// Largest accepted transaction blob
    pub const MAX_TX_SIZE: u64 = 1_000_000_000;

    /// Coinbase outputs stay locked for this many blocks
    pub const MINED_MONEY_UNLOCK_WINDOW: u32 = 10;

    /// How far (seconds) a block timestamp may run ahead of local time
    pub const BLOCK_FUTURE_TIME_LIMIT: u64 = 60 * 60 * 2;

    /// Number of blocks whose median timestamp bounds a new block
    pub const TIMESTAMP_CHECK_WINDOW: usize = 60;

    /// Total money supply in atomic units
    pub const MONEY_SUPPLY: u64 = u64::MAX;
    pub const EMISSION_SPEED_FACTOR: u32 = 18;

    /// Number of recent blocks whose median size drives reward penalties
    pub const REWARD_BLOCKS_WINDOW: usize = 100;
    pub const BLOCK_GRANTED_FULL_REWARD_ZONE_V1: u64 = 10_000;
    pub const BLOCK_GRANTED_FULL_REWARD_ZONE: u64 = 20_000;
    pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

    /// Target seconds between blocks
    pub const DIFFICULTY_TARGET: u64 = 120;
    pub const EXPECTED_NUMBER_OF_BLOCKS_PER_DAY: u32 = (24 * 60 * 60 / DIFFICULTY_TARGET) as u32;
    pub const DIFFICULTY_WINDOW: usize = EXPECTED_NUMBER_OF_BLOCKS_PER_DAY as usize;
    pub const DIFFICULTY_CUT: usize = 60;
    pub const DIFFICULTY_LAG: usize = 15;

    pub const MAX_BLOCK_SIZE_INITIAL: u64 = 20 * 1024;
    pub const MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR: u64 = 100 * 1024;
    pub const MAX_BLOCK_SIZE_GROWTH_SPEED_DENOMINATOR: u64 = 365 * 24 * 60 * 60 / DIFFICULTY_TARGET;

    pub const LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 = DIFFICULTY_TARGET;
    pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u32 = 1;

    /// Amounts below this are not split into denominations
    pub const DEFAULT_DUST_THRESHOLD: u64 = 1_000_000;

    /// Upgrade voting: percentage of the window that must vote
    pub const UPGRADE_VOTING_THRESHOLD: u32 = 90;
    pub const UPGRADE_VOTING_WINDOW: u32 = EXPECTED_NUMBER_OF_BLOCKS_PER_DAY;
    pub const UPGRADE_WINDOW: u32 = EXPECTED_NUMBER_OF_BLOCKS_PER_DAY * 7;

    /// Height meaning "not scheduled"
    pub const UNDEF_HEIGHT: u32 = u32::MAX;

    pub const BLOCK_MAJOR_VERSION_1: u8 = 1;
    pub const BLOCK_MAJOR_VERSION_2: u8 = 2;
    pub const BLOCK_MINOR_VERSION_0: u8 = 0;
    /// Minor version of a v1 block voting for the upgrade
    pub const BLOCK_MINOR_VERSION_1: u8 = 1;

    pub const CURRENT_TRANSACTION_VERSION: u8 = 1;

    /// Merge-mining parent block size limit in bytes
    pub const MAX_PARENT_BLOCK_SIZE: u64 = 2048;

    pub const GENESIS_TIMESTAMP: u64 = 1_341_378_000;
    pub const GENESIS_NONCE: u32 = 70;

    pub const BLOCKS_FILENAME: &str = "blocks";
    pub const BLOCKS_CACHE_FILENAME: &str = "blockscache.dat";
    pub const BLOCKCHAIN_INDICES_FILENAME: &str = "blockchainindices.dat";
}
