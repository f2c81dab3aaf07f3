//! Chain indices
//!
//! The five primary indices (block ids, transaction locations, spent key
//! images, key outputs and multisignature outputs) plus the secondary
//! lookups derived from the main chain. All containers are ordered so
//! that equal contents always serialize to equal bytes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::error;

use crate::consensus::Block;
use crate::crypto::{Hash, KeyImage};
use crate::validation::{extra::get_payment_id, Transaction, TransactionInput, TransactionOutputTarget};

use super::block_index::BlockIndex;
use super::db::TransactionEntry;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Transaction {0} is already in the chain")]
    DuplicateTransaction(Hash),
    #[error("Transaction {0} spends a multisignature output twice")]
    DuplicateMultisignatureInput(Hash),
    #[error("Key image {0} is already spent")]
    DoubleSpend(KeyImage),
    #[error("Multisignature output {index} of amount {amount} does not exist")]
    UnknownMultisignatureOutput { amount: u64, index: u32 },
}

/// Location of a transaction: block height and position within the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionIndex {
    pub block: u32,
    pub transaction: u16,
}

/// A multisignature output and whether it has been spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisignatureOutputUsage {
    pub transaction_index: TransactionIndex,
    pub output_index: u16,
    pub is_used: bool,
}

/// Indices rebuilt by replaying the main chain, cached in `blockscache.dat`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIndices {
    pub block_index: BlockIndex,
    pub transaction_map: BTreeMap<Hash, TransactionIndex>,
    pub spent_keys: BTreeSet<KeyImage>,
    /// Per amount, global index -> (transaction, output position)
    pub outputs: BTreeMap<u64, Vec<(TransactionIndex, u16)>>,
    pub multisignature_outputs: BTreeMap<u64, Vec<MultisignatureOutputUsage>>,
}

impl ChainIndices {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Index a main-chain transaction at `index`, assigning global indexes
    /// to its outputs.
    ///
    /// On error nothing is left behind: key images inserted before the
    /// failing one are removed again.
    pub fn push_transaction(
        &mut self,
        hash: Hash,
        index: TransactionIndex,
        entry: &mut TransactionEntry,
    ) -> Result<(), IndexError> {
        if self.transaction_map.contains_key(&hash) {
            return Err(IndexError::DuplicateTransaction(hash));
        }
        if !entry.tx.check_multisignature_inputs_diff() {
            return Err(IndexError::DuplicateMultisignatureInput(hash));
        }
        for input in &entry.tx.prefix.inputs {
            if let TransactionInput::Multisignature(input) = input {
                let known = self
                    .multisignature_outputs
                    .get(&input.amount)
                    .map_or(false, |outputs| (input.output_index as usize) < outputs.len());
                if !known {
                    return Err(IndexError::UnknownMultisignatureOutput {
                        amount: input.amount,
                        index: input.output_index,
                    });
                }
            }
        }

        let mut inserted: Vec<KeyImage> = Vec::new();
        for image in entry.tx.key_images() {
            if !self.spent_keys.insert(*image) {
                for done in inserted.iter().rev() {
                    self.spent_keys.remove(done);
                }
                return Err(IndexError::DoubleSpend(*image));
            }
            inserted.push(*image);
        }
        self.transaction_map.insert(hash, index);

        for input in &entry.tx.prefix.inputs {
            if let TransactionInput::Multisignature(input) = input {
                if let Some(usage) = self
                    .multisignature_outputs
                    .get_mut(&input.amount)
                    .and_then(|outputs| outputs.get_mut(input.output_index as usize))
                {
                    usage.is_used = true;
                }
            }
        }

        let mut global_indexes = vec![0u32; entry.tx.prefix.outputs.len()];
        for (position, output) in entry.tx.prefix.outputs.iter().enumerate() {
            let output_index = position as u16;
            match &output.target {
                TransactionOutputTarget::Key(_) => {
                    let outputs = self.outputs.entry(output.amount).or_default();
                    global_indexes[position] = outputs.len() as u32;
                    outputs.push((index, output_index));
                }
                TransactionOutputTarget::Multisignature(_) => {
                    let outputs = self.multisignature_outputs.entry(output.amount).or_default();
                    global_indexes[position] = outputs.len() as u32;
                    outputs.push(MultisignatureOutputUsage {
                        transaction_index: index,
                        output_index,
                        is_used: false,
                    });
                }
            }
        }
        entry.global_output_indexes = global_indexes;
        Ok(())
    }

    /// Undo [`push_transaction`](Self::push_transaction) for the most
    /// recently indexed transaction.
    ///
    /// Inconsistencies are logged and skipped so the rest of the state is
    /// still unwound.
    pub fn pop_transaction(&mut self, hash: &Hash, tx: &Transaction) {
        let Some(index) = self.transaction_map.get(hash).copied() else {
            error!(tx = %hash, "Blockchain consistency broken - cannot find transaction by hash");
            return;
        };

        for (position, output) in tx.prefix.outputs.iter().enumerate().rev() {
            let expected = (index, position as u16);
            match &output.target {
                TransactionOutputTarget::Key(_) => {
                    let Some(outputs) = self.outputs.get_mut(&output.amount) else {
                        error!(amount = output.amount, "Blockchain consistency broken - cannot find amount in outputs map");
                        continue;
                    };
                    if outputs.last() != Some(&expected) {
                        error!(amount = output.amount, "Blockchain consistency broken - invalid output index");
                        continue;
                    }
                    outputs.pop();
                    if outputs.is_empty() {
                        self.outputs.remove(&output.amount);
                    }
                }
                TransactionOutputTarget::Multisignature(_) => {
                    let Some(outputs) = self.multisignature_outputs.get_mut(&output.amount) else {
                        error!(amount = output.amount, "Blockchain consistency broken - cannot find amount in multisignature outputs map");
                        continue;
                    };
                    let last = outputs.last().copied();
                    match last {
                        Some(usage) if (usage.transaction_index, usage.output_index) == expected => {
                            if usage.is_used {
                                error!(amount = output.amount, "Blockchain consistency broken - attempting to remove used output");
                                continue;
                            }
                        }
                        _ => {
                            error!(amount = output.amount, "Blockchain consistency broken - invalid multisignature output index");
                            continue;
                        }
                    }
                    outputs.pop();
                    if outputs.is_empty() {
                        self.multisignature_outputs.remove(&output.amount);
                    }
                }
            }
        }

        for input in &tx.prefix.inputs {
            match input {
                TransactionInput::Key(input) => {
                    if !self.spent_keys.remove(&input.key_image) {
                        error!(key_image = %input.key_image, "Blockchain consistency broken - cannot find spent key");
                    }
                }
                TransactionInput::Multisignature(input) => {
                    match self
                        .multisignature_outputs
                        .get_mut(&input.amount)
                        .and_then(|outputs| outputs.get_mut(input.output_index as usize))
                    {
                        Some(usage) => {
                            if !usage.is_used {
                                error!(amount = input.amount, "Blockchain consistency broken - multisignature output not marked as used");
                            }
                            usage.is_used = false;
                        }
                        None => error!(amount = input.amount, "Blockchain consistency broken - unknown multisignature output"),
                    }
                }
                TransactionInput::Base(_) => {}
            }
        }

        self.transaction_map.remove(hash);
    }
}

/// Payment id -> ids of the transactions carrying it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIdIndex {
    index: BTreeMap<Hash, Vec<Hash>>,
}

impl PaymentIdIndex {
    /// Index `tx` if its extra carries a payment id
    pub fn add(&mut self, tx: &Transaction) -> bool {
        match get_payment_id(&tx.prefix.extra) {
            Some(payment_id) => {
                self.index.entry(payment_id).or_default().push(tx.hash());
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, tx: &Transaction) -> bool {
        let payment_id = match get_payment_id(&tx.prefix.extra) {
            Some(id) => id,
            None => return false,
        };
        let hash = tx.hash();
        let Some(hashes) = self.index.get_mut(&payment_id) else {
            return false;
        };
        let Some(position) = hashes.iter().position(|h| *h == hash) else {
            return false;
        };
        hashes.remove(position);
        if hashes.is_empty() {
            self.index.remove(&payment_id);
        }
        true
    }

    pub fn find(&self, payment_id: &Hash) -> Vec<Hash> {
        self.index.get(payment_id).cloned().unwrap_or_default()
    }
}

/// Block timestamp -> ids of main-chain blocks with that timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampIndex {
    index: BTreeMap<u64, Vec<Hash>>,
}

impl TimestampIndex {
    pub fn add(&mut self, timestamp: u64, hash: Hash) {
        self.index.entry(timestamp).or_default().push(hash);
    }

    pub fn remove(&mut self, timestamp: u64, hash: &Hash) -> bool {
        let Some(hashes) = self.index.get_mut(&timestamp) else {
            return false;
        };
        let Some(position) = hashes.iter().position(|h| h == hash) else {
            return false;
        };
        hashes.remove(position);
        if hashes.is_empty() {
            self.index.remove(&timestamp);
        }
        true
    }

    /// Block ids with timestamps in `[begin, end]`, at most `limit` of
    /// them, along with the total number in range
    pub fn find(&self, begin: u64, end: u64, limit: usize) -> (Vec<Hash>, usize) {
        if begin > end {
            return (Vec::new(), 0);
        }
        let mut total = 0;
        let mut hashes = Vec::new();
        for ids in self.index.range(begin..=end).map(|(_, ids)| ids) {
            total += ids.len();
            for id in ids {
                if hashes.len() < limit {
                    hashes.push(*id);
                }
            }
        }
        (hashes, total)
    }
}

/// Height -> number of transactions (coinbases included) up to that block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTransactionsIndex {
    counts: Vec<u64>,
}

impl GeneratedTransactionsIndex {
    /// Record the block at the next height; fails on a height mismatch
    pub fn add(&mut self, block: &Block) -> bool {
        if block.height() != Some(self.counts.len() as u32) {
            return false;
        }
        let last = self.counts.last().copied().unwrap_or(0);
        self.counts.push(last + block.transaction_hashes.len() as u64 + 1);
        true
    }

    /// Forget the last block, which must be `block`
    pub fn remove(&mut self, block: &Block) -> bool {
        match block.height() {
            Some(height) if height as usize + 1 == self.counts.len() => {
                self.counts.pop();
                true
            }
            _ => false,
        }
    }

    pub fn find(&self, height: u32) -> Option<u64> {
        self.counts.get(height as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Height -> ids of alternative blocks seen at that height
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanBlocksIndex {
    index: BTreeMap<u32, Vec<Hash>>,
}

impl OrphanBlocksIndex {
    pub fn add(&mut self, block: &Block) -> bool {
        let Some(height) = block.height() else {
            return false;
        };
        self.index.entry(height).or_default().push(block.hash());
        true
    }

    pub fn remove(&mut self, block: &Block) -> bool {
        let Some(height) = block.height() else {
            return false;
        };
        let hash = block.hash();
        let Some(hashes) = self.index.get_mut(&height) else {
            return false;
        };
        let Some(position) = hashes.iter().position(|h| *h == hash) else {
            return false;
        };
        hashes.remove(position);
        if hashes.is_empty() {
            self.index.remove(&height);
        }
        true
    }

    pub fn find(&self, height: u32) -> Vec<Hash> {
        self.index.get(&height).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

/// Secondary indices cached in `blockchainindices.dat`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndices {
    pub payment_ids: PaymentIdIndex,
    pub timestamps: TimestampIndex,
    pub generated_transactions: GeneratedTransactionsIndex,
}

impl SecondaryIndices {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
