//! Transaction input validation against the main chain

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::crypto::{check_ring_signature, check_signature, Hash, PublicKey, Signature};
use crate::storage::{BlockEntry, StorageError, TransactionIndex};
use crate::validation::{
    relative_output_offsets_to_absolute, KeyInput, MultisignatureInput, Transaction, TransactionInput,
    TransactionOutputTarget,
};

use super::error::TxInputError;
use super::state::ChainState;

/// A main-chain block by height and id. The zero id means "unset".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub height: u32,
    pub id: Hash,
}

impl BlockInfo {
    pub fn is_empty(&self) -> bool {
        self.id.is_zero()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Blocks loaded while resolving one transaction's rings
#[derive(Default)]
struct EntryCache {
    entries: HashMap<u32, BlockEntry>,
}

impl EntryCache {
    fn transaction<'a>(
        &'a mut self,
        state: &ChainState,
        index: TransactionIndex,
    ) -> Result<&'a Transaction, TxInputError> {
        if !self.entries.contains_key(&index.block) {
            let entry = state.store.get(index.block)?;
            self.entries.insert(index.block, entry);
        }
        self.entries
            .get(&index.block)
            .and_then(|entry| entry.transactions.get(index.transaction as usize))
            .map(|t| &t.tx)
            .ok_or(TxInputError::Storage(StorageError::MissingBlock(index.block)))
    }
}

impl ChainState {
    /// Validate every input of `tx` against the current main chain.
    ///
    /// Returns the highest block holding an output referenced by a ring.
    /// Inside the checkpoint zone ring signatures are not verified.
    pub(crate) fn check_transaction_inputs(&self, tx: &Transaction) -> Result<u32, TxInputError> {
        if !tx.check_inputs_overflow() || tx.input_amount() < tx.output_amount() {
            return Err(TxInputError::Overspend);
        }

        let prefix_hash = tx.prefix_hash();
        let mut cache = EntryCache::default();
        let mut max_used_block = 0;
        for (position, input) in tx.prefix.inputs.iter().enumerate() {
            let signatures = tx
                .signatures
                .get(position)
                .ok_or(TxInputError::MissingSignatures(position))?;
            match input {
                TransactionInput::Key(input) => {
                    if input.output_indexes.is_empty() {
                        return Err(TxInputError::EmptyRing);
                    }
                    if self.indices.spent_keys.contains(&input.key_image) {
                        return Err(TxInputError::KeyImageSpent(input.key_image));
                    }
                    let used = self.check_key_input(&mut cache, input, &prefix_hash, signatures)?;
                    max_used_block = max_used_block.max(used);
                }
                TransactionInput::Multisignature(input) => {
                    self.check_multisignature_input(&mut cache, input, &prefix_hash, signatures)?;
                }
                TransactionInput::Base(_) => return Err(TxInputError::UnexpectedBaseInput),
            }
        }
        Ok(max_used_block)
    }

    fn check_key_input(
        &self,
        cache: &mut EntryCache,
        input: &KeyInput,
        prefix_hash: &Hash,
        signatures: &[Signature],
    ) -> Result<u32, TxInputError> {
        let outputs = self
            .indices
            .outputs
            .get(&input.amount)
            .ok_or(TxInputError::UnknownAmount(input.amount))?;

        let mut ring: Vec<PublicKey> = Vec::with_capacity(input.output_indexes.len());
        let mut max_used_block = 0;
        for index in relative_output_offsets_to_absolute(&input.output_indexes) {
            let (location, position) = *outputs.get(index as usize).ok_or(TxInputError::OutputIndexOutOfRange {
                amount: input.amount,
                index,
            })?;
            let source = cache.transaction(self, location)?;
            if !self.is_spend_time_unlocked(source.prefix.unlock_time) {
                return Err(TxInputError::OutputLocked);
            }
            match source.prefix.outputs.get(position as usize).map(|o| &o.target) {
                Some(TransactionOutputTarget::Key(output)) => ring.push(output.key),
                Some(_) => return Err(TxInputError::WrongOutputType),
                None => {
                    return Err(TxInputError::OutputIndexOutOfRange {
                        amount: input.amount,
                        index,
                    })
                }
            }
            max_used_block = max_used_block.max(location.block);
        }

        if self.in_checkpoint_zone {
            return Ok(max_used_block);
        }
        if signatures.len() != ring.len() {
            return Err(TxInputError::SignatureCount {
                expected: ring.len(),
                found: signatures.len(),
            });
        }
        if !check_ring_signature(prefix_hash, &input.key_image, &ring, signatures) {
            return Err(TxInputError::RingSignature);
        }
        Ok(max_used_block)
    }

    fn check_multisignature_input(
        &self,
        cache: &mut EntryCache,
        input: &MultisignatureInput,
        prefix_hash: &Hash,
        signatures: &[Signature],
    ) -> Result<(), TxInputError> {
        if signatures.len() != input.signature_count as usize {
            return Err(TxInputError::SignatureCount {
                expected: input.signature_count as usize,
                found: signatures.len(),
            });
        }
        let usage = self
            .indices
            .multisignature_outputs
            .get(&input.amount)
            .ok_or(TxInputError::UnknownAmount(input.amount))?
            .get(input.output_index as usize)
            .copied()
            .ok_or(TxInputError::OutputIndexOutOfRange {
                amount: input.amount,
                index: input.output_index,
            })?;
        if usage.is_used {
            return Err(TxInputError::MultisignatureUsed);
        }

        let source = cache.transaction(self, usage.transaction_index)?;
        if !self.is_spend_time_unlocked(source.prefix.unlock_time) {
            return Err(TxInputError::OutputLocked);
        }
        let output = match source.prefix.outputs.get(usage.output_index as usize) {
            Some(output) if output.amount == input.amount => output,
            _ => return Err(TxInputError::WrongOutputType),
        };
        let TransactionOutputTarget::Multisignature(output) = &output.target else {
            return Err(TxInputError::WrongOutputType);
        };
        if input.signature_count != output.required_signature_count {
            return Err(TxInputError::SignatureCount {
                expected: output.required_signature_count as usize,
                found: input.signature_count as usize,
            });
        }

        // Signatures must match keys in order; keys may be skipped
        let mut keys = output.keys.iter();
        for signature in signatures {
            let matched = keys.by_ref().any(|key| check_signature(prefix_hash, key, signature));
            if !matched {
                return Err(TxInputError::MultisignatureSignatures);
            }
        }
        Ok(())
    }

    /// Check `tx` and report the highest referenced block with its id
    pub(crate) fn check_transaction_inputs_with_block(&self, tx: &Transaction) -> Result<BlockInfo, TxInputError> {
        let height = self.check_transaction_inputs(tx)?;
        let id = self
            .indices
            .block_index
            .get_block_id(height)
            .ok_or(TxInputError::MaxUsedBlock(height))?;
        Ok(BlockInfo { height, id })
    }

    /// Recheck with memoization for pooled transactions.
    ///
    /// `max_used_block` remembers the highest block a successful check
    /// depended on; while that block is still on the main chain the check
    /// is skipped. `last_failed` remembers the tail a failed check ran
    /// against, so the same failure is not recomputed.
    pub(crate) fn check_transaction_inputs_cached(
        &self,
        tx: &Transaction,
        max_used_block: &mut BlockInfo,
        last_failed: &mut BlockInfo,
    ) -> bool {
        let on_main_chain = |info: &BlockInfo| self.indices.block_index.get_block_id(info.height) == Some(info.id);

        if max_used_block.is_empty() {
            if !last_failed.is_empty() && self.height() > last_failed.height && on_main_chain(last_failed) {
                return false;
            }
        } else {
            if max_used_block.height >= self.height() {
                return false;
            }
            if on_main_chain(max_used_block) {
                return true;
            }
            if !last_failed.is_empty() && on_main_chain(last_failed) {
                return false;
            }
        }

        match self.check_transaction_inputs_with_block(tx) {
            Ok(info) => {
                *max_used_block = info;
                true
            }
            Err(e) => {
                debug!(tx = %tx.hash(), error = %e, "Transaction inputs rejected");
                *last_failed = BlockInfo {
                    height: self.height().saturating_sub(1),
                    id: self.tail_id(),
                };
                if matches!(e, TxInputError::Storage(_)) {
                    warn!(error = %e, "Storage error while checking inputs");
                }
                false
            }
        }
    }
}
