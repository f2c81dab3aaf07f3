//! Transaction structure
//!
//! Inputs and outputs are closed sum types: every consumer matches them
//! exhaustively, so a new variant cannot be silently ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::crypto::{hash_bytes, Hash, KeyImage, PublicKey, Signature};

const TAG_BASE: u8 = 0xff;
const TAG_KEY: u8 = 0x02;
const TAG_MULTISIGNATURE: u8 = 0x03;

/// Coinbase input: records the height of the block it rewards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseInput {
    pub block_index: u32,
}

/// Spends one of a ring of outputs of the same amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    pub amount: u64,
    /// Global output indexes, relative-encoded (first absolute, then deltas)
    pub output_indexes: Vec<u32>,
    pub key_image: KeyImage,
}

/// Spends a multisignature output by its global index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisignatureInput {
    pub amount: u64,
    pub signature_count: u8,
    pub output_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionInput {
    Base(BaseInput),
    Key(KeyInput),
    Multisignature(MultisignatureInput),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOutput {
    pub key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisignatureOutput {
    pub keys: Vec<PublicKey>,
    pub required_signature_count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutputTarget {
    Key(KeyOutput),
    Multisignature(MultisignatureOutput),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: TransactionOutputTarget,
}

/// The signed part of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPrefix {
    pub version: u8,
    /// Block height (below the max block number) or unix time
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

/// A complete transaction: prefix plus one signature list per input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    pub signatures: Vec<Vec<Signature>>,
}

impl TransactionInput {
    /// Amount spent by this input (zero for coinbase)
    pub fn amount(&self) -> u64 {
        match self {
            TransactionInput::Base(_) => 0,
            TransactionInput::Key(input) => input.amount,
            TransactionInput::Multisignature(input) => input.amount,
        }
    }

    /// Number of signatures this input must carry
    pub fn required_signatures(&self) -> usize {
        match self {
            TransactionInput::Base(_) => 0,
            TransactionInput::Key(input) => input.output_indexes.len(),
            TransactionInput::Multisignature(input) => input.signature_count as usize,
        }
    }

    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            TransactionInput::Base(input) => {
                bytes.push(TAG_BASE);
                bytes.extend_from_slice(&input.block_index.to_le_bytes());
            }
            TransactionInput::Key(input) => {
                bytes.push(TAG_KEY);
                bytes.extend_from_slice(&input.amount.to_le_bytes());
                bytes.extend_from_slice(&(input.output_indexes.len() as u32).to_le_bytes());
                for index in &input.output_indexes {
                    bytes.extend_from_slice(&index.to_le_bytes());
                }
                bytes.extend_from_slice(&input.key_image.0);
            }
            TransactionInput::Multisignature(input) => {
                bytes.push(TAG_MULTISIGNATURE);
                bytes.extend_from_slice(&input.amount.to_le_bytes());
                bytes.push(input.signature_count);
                bytes.extend_from_slice(&input.output_index.to_le_bytes());
            }
        }
    }
}

impl TransactionOutput {
    fn write(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        match &self.target {
            TransactionOutputTarget::Key(out) => {
                bytes.push(TAG_KEY);
                bytes.extend_from_slice(&out.key.0);
            }
            TransactionOutputTarget::Multisignature(out) => {
                bytes.push(TAG_MULTISIGNATURE);
                bytes.extend_from_slice(&(out.keys.len() as u32).to_le_bytes());
                for key in &out.keys {
                    bytes.extend_from_slice(&key.0);
                }
                bytes.push(out.required_signature_count);
            }
        }
    }
}

impl TransactionPrefix {
    /// Canonical binary form, the input of the prefix hash
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.push(self.version);
        bytes.extend_from_slice(&self.unlock_time.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            input.write(&mut bytes);
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            output.write(&mut bytes);
        }

        bytes.extend_from_slice(&(self.extra.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.extra);
        bytes
    }

    /// Hash signed by ring and multisignature signatures
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }
}

impl Transaction {
    pub fn new(prefix: TransactionPrefix, signatures: Vec<Vec<Signature>>) -> Self {
        Self { prefix, signatures }
    }

    /// Canonical binary form: prefix followed by every signature
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.prefix.to_bytes();
        for signatures in &self.signatures {
            bytes.extend_from_slice(&(signatures.len() as u32).to_le_bytes());
            for signature in signatures {
                bytes.extend_from_slice(&signature.0);
            }
        }
        bytes
    }

    /// Transaction id
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }

    pub fn prefix_hash(&self) -> Hash {
        self.prefix.hash()
    }

    /// Size of the canonical binary form in bytes
    pub fn blob_size(&self) -> u64 {
        self.to_bytes().len() as u64
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.prefix.inputs.len() == 1 && matches!(self.prefix.inputs[0], TransactionInput::Base(_))
    }

    /// Height recorded in the coinbase input, if any
    pub fn coinbase_height(&self) -> Option<u32> {
        match self.prefix.inputs.first() {
            Some(TransactionInput::Base(input)) => Some(input.block_index),
            _ => None,
        }
    }

    pub fn input_amount(&self) -> u64 {
        self.prefix.inputs.iter().fold(0u64, |sum, i| sum.saturating_add(i.amount()))
    }

    pub fn output_amount(&self) -> u64 {
        self.prefix.outputs.iter().fold(0u64, |sum, o| sum.saturating_add(o.amount))
    }

    /// Fee paid: inputs minus outputs
    pub fn fee(&self) -> u64 {
        self.input_amount().saturating_sub(self.output_amount())
    }

    /// Whether the output amounts sum without overflow
    pub fn check_outputs_overflow(&self) -> bool {
        self.prefix
            .outputs
            .iter()
            .try_fold(0u64, |sum, o| sum.checked_add(o.amount))
            .is_some()
    }

    /// Whether the input amounts sum without overflow
    pub fn check_inputs_overflow(&self) -> bool {
        self.prefix
            .inputs
            .iter()
            .try_fold(0u64, |sum, i| sum.checked_add(i.amount()))
            .is_some()
    }

    /// Outputs must carry a positive amount and valid keys
    pub fn check_outputs_valid(&self) -> bool {
        self.prefix.outputs.iter().all(|output| {
            if output.amount == 0 {
                return false;
            }
            match &output.target {
                TransactionOutputTarget::Key(out) => out.key.is_valid(),
                TransactionOutputTarget::Multisignature(out) => {
                    out.required_signature_count as usize <= out.keys.len()
                        && out.keys.iter().all(|k| k.is_valid())
                }
            }
        })
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.prefix.inputs.iter().filter_map(|input| match input {
            TransactionInput::Key(key) => Some(&key.key_image),
            TransactionInput::Base(_) | TransactionInput::Multisignature(_) => None,
        })
    }

    /// Whether every key image of the transaction is distinct
    pub fn check_key_images_unique(&self) -> bool {
        let mut seen = HashSet::new();
        self.key_images().all(|image| seen.insert(*image))
    }

    /// Whether no two multisignature inputs spend the same output
    pub fn check_multisignature_inputs_diff(&self) -> bool {
        let mut seen = HashSet::new();
        self.prefix.inputs.iter().all(|input| match input {
            TransactionInput::Multisignature(ms) => seen.insert((ms.amount, ms.output_index)),
            TransactionInput::Base(_) | TransactionInput::Key(_) => true,
        })
    }
}

/// Convert relative output offsets to absolute global indexes
pub fn relative_output_offsets_to_absolute(offsets: &[u32]) -> Vec<u32> {
    let mut result = Vec::with_capacity(offsets.len());
    let mut current: u32 = 0;
    for (i, offset) in offsets.iter().enumerate() {
        current = if i == 0 { *offset } else { current.wrapping_add(*offset) };
        result.push(current);
    }
    result
}

/// Convert sorted absolute global indexes to relative offsets
pub fn absolute_output_offsets_to_relative(offsets: &[u32]) -> Vec<u32> {
    let mut result = Vec::with_capacity(offsets.len());
    let mut previous: u32 = 0;
    for (i, offset) in offsets.iter().enumerate() {
        result.push(if i == 0 { *offset } else { offset.wrapping_sub(previous) });
        previous = *offset;
    }
    result
}
