//! Transaction pool - the collaborator holding not-yet-mined transactions
//!
//! The chain core takes transactions out while it validates a block and
//! hands them back when a block fails or is popped.

mod memory;

pub use memory::*;

use crate::crypto::Hash;
use crate::validation::Transaction;

/// A transaction taken out of the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTransaction {
    pub tx: Transaction,
    pub blob_size: u64,
    pub fee: u64,
}

/// Pool interface consumed by the blockchain
pub trait TransactionPool: Send {
    /// Remove the transaction `hash` for inclusion in a block
    fn take(&mut self, hash: &Hash) -> Option<PoolTransaction>;

    /// Insert a transaction. `kept_by_block` marks transactions returned
    /// from a failed or popped block, which skip the pool's own checks.
    fn add(&mut self, tx: Transaction, kept_by_block: bool) -> bool;

    fn have_transaction(&self, hash: &Hash) -> bool;

    /// Serialized size of a pooled transaction
    fn transaction_blob_size(&self, hash: &Hash) -> Option<u64>;

    fn transaction_hashes(&self) -> Vec<Hash>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
