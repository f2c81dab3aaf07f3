//! Rejection reasons and verification results

use thiserror::Error;

use crate::consensus::CurrencyError;
use crate::crypto::{Hash, KeyImage};
use crate::storage::{IndexError, StorageError};

/// Outcome flags of offering a block to the chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockVerificationContext {
    pub added_to_main_chain: bool,
    pub verification_failed: bool,
    pub marked_as_orphaned: bool,
    pub already_exists: bool,
    pub switched_to_alt_chain: bool,
}

/// Why a transaction input was rejected
#[derive(Debug, Error)]
pub enum TxInputError {
    #[error("Input has an empty ring")]
    EmptyRing,
    #[error("Key image {0} already spent")]
    KeyImageSpent(KeyImage),
    #[error("Coinbase input in a regular transaction")]
    UnexpectedBaseInput,
    #[error("Transaction spends more than its inputs")]
    Overspend,
    #[error("Input {0} has no signatures")]
    MissingSignatures(usize),
    #[error("No outputs of amount {0}")]
    UnknownAmount(u64),
    #[error("Output {index} of amount {amount} does not exist")]
    OutputIndexOutOfRange { amount: u64, index: u32 },
    #[error("Referenced output is still locked")]
    OutputLocked,
    #[error("Referenced output has the wrong type")]
    WrongOutputType,
    #[error("Expected {expected} signatures, found {found}")]
    SignatureCount { expected: usize, found: usize },
    #[error("Ring signature check failed")]
    RingSignature,
    #[error("Multisignature output already spent")]
    MultisignatureUsed,
    #[error("Multisignature signatures do not match the output keys")]
    MultisignatureSignatures,
    #[error("Maximum used block {0} is beyond the chain")]
    MaxUsedBlock(u32),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a block was rejected
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Block {0} already exists")]
    AlreadyExists(Hash),
    #[error("Block has version {found}, expected {expected}")]
    WrongVersion { expected: u8, found: u8 },
    #[error("Parent block is {0} bytes, too big")]
    ParentBlockTooBig(u64),
    #[error("Previous block hash does not match the chain tail")]
    PreviousMismatch,
    #[error("Timestamp {timestamp} is too far in the future")]
    TimestampInFuture { timestamp: u64 },
    #[error("Timestamp {timestamp} is below the median {median}")]
    TimestampTooOld { timestamp: u64, median: u64 },
    #[error("Difficulty overhead")]
    DifficultyOverhead,
    #[error("Block does not match the checkpoint at height {0}")]
    CheckpointMismatch(u32),
    #[error("Not enough proof of work: {hash} for difficulty {difficulty}")]
    ProofOfWork { hash: Hash, difficulty: u64 },
    #[error("Invalid coinbase: {0}")]
    Coinbase(&'static str),
    #[error("Transaction {0} is not available")]
    TransactionMissing(Hash),
    #[error("Transaction {tx} has invalid inputs: {reason}")]
    TransactionInputs { tx: Hash, reason: TxInputError },
    #[error("Too many transactions in block, position {0} has no index")]
    TooManyTransactions(usize),
    #[error("Cumulative size {size} exceeds {limit}")]
    BlockTooBig { size: u64, limit: u64 },
    #[error("Coinbase pays {found}, expected {expected}")]
    WrongReward { expected: u64, found: u64 },
    #[error("Block size is too big for any reward")]
    RewardUnavailable,
    #[error("Alternative block at height {0} is not allowed")]
    AlternativeNotAllowed(u32),
    #[error("Alternative chain does not connect to the main chain")]
    BrokenAlternativeChain,
    #[error("Switching to the alternative chain failed: {0}")]
    Reorganization(Box<BlockError>),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Currency(#[from] CurrencyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why the chain could not be opened
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Cannot create data directory: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Genesis block mismatch: stored {stored}, expected {expected}")]
    GenesisMismatch { stored: Hash, expected: Hash },
    #[error("Genesis block rejected: {0}")]
    GenesisRejected(BlockError),
    #[error("Failed to initialize the upgrade detector")]
    UpgradeDetector,
    #[error("Failed to roll back: {0}")]
    Rollback(BlockError),
}
