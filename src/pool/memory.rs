//! In-memory transaction pool

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::crypto::{Hash, KeyImage};
use crate::validation::Transaction;

use super::{PoolTransaction, TransactionPool};

#[derive(Debug, Clone)]
struct PoolEntry {
    tx: Transaction,
    blob_size: u64,
    fee: u64,
    kept_by_block: bool,
}

/// Hash-keyed pool with a key-image set guarding against pool double spends
#[derive(Debug, Default)]
pub struct MemoryPool {
    transactions: HashMap<Hash, PoolEntry>,
    spent_key_images: BTreeMap<KeyImage, BTreeSet<Hash>>,
    max_tx_size: Option<u64>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject transactions larger than `max_tx_size` unless kept by a block
    pub fn with_max_tx_size(max_tx_size: u64) -> Self {
        Self {
            max_tx_size: Some(max_tx_size),
            ..Self::default()
        }
    }

    /// Whether `image` is spent by a pooled transaction
    pub fn have_key_image(&self, image: &KeyImage) -> bool {
        self.spent_key_images.contains_key(image)
    }

    pub fn is_kept_by_block(&self, hash: &Hash) -> bool {
        self.transactions.get(hash).map_or(false, |e| e.kept_by_block)
    }

    fn remove_key_images(&mut self, hash: &Hash, tx: &Transaction) {
        for image in tx.key_images() {
            if let Some(hashes) = self.spent_key_images.get_mut(image) {
                hashes.remove(hash);
                if hashes.is_empty() {
                    self.spent_key_images.remove(image);
                }
            }
        }
    }
}

impl TransactionPool for MemoryPool {
    fn take(&mut self, hash: &Hash) -> Option<PoolTransaction> {
        let entry = self.transactions.remove(hash)?;
        self.remove_key_images(hash, &entry.tx);
        Some(PoolTransaction {
            tx: entry.tx,
            blob_size: entry.blob_size,
            fee: entry.fee,
        })
    }

    fn add(&mut self, tx: Transaction, kept_by_block: bool) -> bool {
        let hash = tx.hash();
        if self.transactions.contains_key(&hash) {
            return false;
        }
        if tx.is_coinbase() {
            warn!(tx = %hash, "Coinbase transaction rejected by pool");
            return false;
        }

        if !kept_by_block {
            if !tx.check_inputs_overflow() || !tx.check_outputs_overflow() {
                warn!(tx = %hash, "Transaction amounts overflow");
                return false;
            }
            if tx.input_amount() < tx.output_amount() {
                warn!(tx = %hash, "Transaction spends more than its inputs");
                return false;
            }
            if !tx.check_key_images_unique() {
                warn!(tx = %hash, "Transaction repeats a key image");
                return false;
            }
            if let Some(image) = tx.key_images().find(|i| self.have_key_image(i)) {
                warn!(tx = %hash, key_image = %image, "Key image already spent in pool");
                return false;
            }
            let blob_size = tx.blob_size();
            if self.max_tx_size.map_or(false, |max| blob_size > max) {
                warn!(tx = %hash, blob_size, "Transaction is too big");
                return false;
            }
        }

        for image in tx.key_images() {
            self.spent_key_images.entry(*image).or_default().insert(hash);
        }
        debug!(tx = %hash, kept_by_block, "Transaction added to pool");
        self.transactions.insert(
            hash,
            PoolEntry {
                blob_size: tx.blob_size(),
                fee: tx.fee(),
                kept_by_block,
                tx,
            },
        );
        true
    }

    fn have_transaction(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    fn transaction_blob_size(&self, hash: &Hash) -> Option<u64> {
        self.transactions.get(hash).map(|e| e.blob_size)
    }

    fn transaction_hashes(&self) -> Vec<Hash> {
        let mut hashes: Vec<Hash> = self.transactions.keys().copied().collect();
        hashes.sort();
        hashes
    }

    fn len(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_key_image, KeyPair};
    use crate::validation::{
        BaseInput, KeyInput, KeyOutput, TransactionInput, TransactionOutput, TransactionOutputTarget,
        TransactionPrefix,
    };

    fn spend(image: KeyImage, amount: u64, out: u64) -> Transaction {
        Transaction::new(
            TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TransactionInput::Key(KeyInput {
                    amount,
                    output_indexes: vec![0],
                    key_image: image,
                })],
                outputs: vec![TransactionOutput {
                    amount: out,
                    target: TransactionOutputTarget::Key(KeyOutput {
                        key: KeyPair::generate().public_key,
                    }),
                }],
                extra: vec![],
            },
            vec![vec![]],
        )
    }

    fn image() -> KeyImage {
        let pair = KeyPair::generate();
        generate_key_image(&pair.public_key, &pair.secret_key)
    }

    #[test]
    fn test_add_take() {
        let mut pool = MemoryPool::new();
        let tx = spend(image(), 100, 90);
        let hash = tx.hash();

        assert!(pool.add(tx.clone(), false));
        assert!(!pool.add(tx.clone(), false));
        assert!(pool.have_transaction(&hash));
        assert_eq!(pool.transaction_blob_size(&hash), Some(tx.blob_size()));

        let taken = pool.take(&hash).unwrap();
        assert_eq!(taken.fee, 10);
        assert_eq!(taken.tx, tx);
        assert!(pool.is_empty());
        assert!(pool.take(&hash).is_none());
    }

    #[test]
    fn test_pool_double_spend_rejected_unless_kept() {
        let mut pool = MemoryPool::new();
        let shared = image();
        assert!(pool.add(spend(shared, 100, 90), false));
        assert!(!pool.add(spend(shared, 100, 80), false));
        assert!(pool.add(spend(shared, 100, 70), true));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_take_releases_key_images() {
        let mut pool = MemoryPool::new();
        let shared = image();
        let first = spend(shared, 100, 90);
        pool.add(first.clone(), false);
        pool.take(&first.hash());
        assert!(!pool.have_key_image(&shared));
        assert!(pool.add(spend(shared, 100, 80), false));
    }

    #[test]
    fn test_rejects_coinbase_and_overspend() {
        let mut pool = MemoryPool::new();
        let mut coinbase = spend(image(), 0, 10);
        coinbase.prefix.inputs = vec![TransactionInput::Base(BaseInput { block_index: 1 })];
        assert!(!pool.add(coinbase, true));
        assert!(!pool.add(spend(image(), 10, 20), false));
    }
}
