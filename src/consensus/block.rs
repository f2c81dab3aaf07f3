//! Block structure
//!
//! A block commits to its coinbase and the ids of its transactions through
//! the tree hash. Version 2 blocks are merge mined: they embed the header
//! and coinbase of a parent chain's block, whose proof of work they reuse.

use serde::{Deserialize, Serialize};

use crate::constants::BLOCK_MAJOR_VERSION_2;
use crate::crypto::{hash_bytes, pow_hash, tree_hash, tree_hash_from_branch, Hash};
use crate::validation::Transaction;

/// Block header fields shared by every version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub nonce: u32,
    /// Seconds since the unix epoch
    pub timestamp: u64,
    pub previous_block_hash: Hash,
}

/// Parent-chain block carried by a merge-mined block.
///
/// Timestamp and nonce are shared with the child block header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentBlock {
    pub major_version: u8,
    pub minor_version: u8,
    pub previous_block_hash: Hash,
    pub transaction_count: u16,
    /// Proves the parent coinbase against the parent transaction root
    pub base_transaction_branch: Vec<Hash>,
    pub base_transaction: Transaction,
    /// Proves this block's auxiliary header hash against the merge-mining tag
    pub blockchain_branch: Vec<Hash>,
}

/// A complete block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// Present for major version 2 and above
    pub parent_block: Option<ParentBlock>,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash>,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(46);
        bytes.push(self.major_version);
        bytes.push(self.minor_version);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.previous_block_hash.0);
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }
}

impl ParentBlock {
    /// Root of the parent block's transaction tree
    pub fn transactions_tree_root(&self) -> Hash {
        tree_hash_from_branch(
            &self.base_transaction_branch,
            &self.base_transaction.hash(),
            None,
        )
    }

    /// Full binary form, used for the block id and the size limit
    pub fn to_bytes(&self, timestamp: u64, nonce: u32) -> Vec<u8> {
        let mut bytes = self.hashing_blob(timestamp, nonce);
        bytes.extend_from_slice(&(self.base_transaction_branch.len() as u32).to_le_bytes());
        for hash in &self.base_transaction_branch {
            bytes.extend_from_slice(&hash.0);
        }
        bytes.extend_from_slice(&self.base_transaction.to_bytes());
        bytes.extend_from_slice(&(self.blockchain_branch.len() as u32).to_le_bytes());
        for hash in &self.blockchain_branch {
            bytes.extend_from_slice(&hash.0);
        }
        bytes
    }

    /// Parent header plus transaction root: the proof-of-work input
    pub fn hashing_blob(&self, timestamp: u64, nonce: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(80);
        bytes.push(self.major_version);
        bytes.push(self.minor_version);
        bytes.extend_from_slice(&timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.previous_block_hash.0);
        bytes.extend_from_slice(&nonce.to_le_bytes());
        bytes.extend_from_slice(&self.transactions_tree_root().0);
        bytes.extend_from_slice(&self.transaction_count.to_le_bytes());
        bytes
    }
}

impl Block {
    pub fn new(header: BlockHeader, base_transaction: Transaction, transaction_hashes: Vec<Hash>) -> Self {
        Self {
            header,
            parent_block: None,
            base_transaction,
            transaction_hashes,
        }
    }

    pub fn major_version(&self) -> u8 {
        self.header.major_version
    }

    pub fn previous_block_hash(&self) -> &Hash {
        &self.header.previous_block_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Root over the coinbase id followed by the transaction ids
    pub fn transactions_tree_root(&self) -> Hash {
        let mut ids = Vec::with_capacity(self.transaction_hashes.len() + 1);
        ids.push(self.base_transaction.hash());
        ids.extend_from_slice(&self.transaction_hashes);
        tree_hash(&ids)
    }

    /// Header, transaction root and transaction count
    pub fn hashing_blob(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes();
        bytes.extend_from_slice(&self.transactions_tree_root().0);
        bytes.extend_from_slice(&(self.transaction_hashes.len() as u32 + 1).to_le_bytes());
        bytes
    }

    /// Block id
    pub fn hash(&self) -> Hash {
        let mut blob = self.hashing_blob();
        if let Some(parent) = self.merge_mined_parent() {
            blob.extend_from_slice(&parent.to_bytes(self.header.timestamp, self.header.nonce));
        }
        hash_bytes(&blob)
    }

    /// Hash committed to by the parent chain's merge-mining tag
    pub fn aux_header_hash(&self) -> Hash {
        hash_bytes(&self.hashing_blob())
    }

    /// Hash compared against the difficulty target
    pub fn proof_of_work_hash(&self) -> Hash {
        match self.merge_mined_parent() {
            Some(parent) => pow_hash(&parent.hashing_blob(self.header.timestamp, self.header.nonce)),
            None => pow_hash(&self.hashing_blob()),
        }
    }

    /// Serialized size of the merge-mining parent, zero without one
    pub fn parent_block_size(&self) -> u64 {
        self.merge_mined_parent()
            .map(|p| p.to_bytes(self.header.timestamp, self.header.nonce).len() as u64)
            .unwrap_or(0)
    }

    /// Height recorded by the coinbase
    pub fn height(&self) -> Option<u32> {
        self.base_transaction.coinbase_height()
    }

    fn merge_mined_parent(&self) -> Option<&ParentBlock> {
        if self.header.major_version >= BLOCK_MAJOR_VERSION_2 {
            self.parent_block.as_ref()
        } else {
            None
        }
    }
}
