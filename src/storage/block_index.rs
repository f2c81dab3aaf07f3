//! Main-chain block index
//!
//! Height to hash and hash to height for the main chain only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::crypto::Hash;

/// Ordered main-chain block ids with a reverse lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Hash>", into = "Vec<Hash>")]
pub struct BlockIndex {
    container: Vec<Hash>,
    index: HashMap<Hash, u32>,
}

impl From<Vec<Hash>> for BlockIndex {
    fn from(container: Vec<Hash>) -> Self {
        let index = container
            .iter()
            .enumerate()
            .map(|(height, hash)| (*hash, height as u32))
            .collect();
        Self { container, index }
    }
}

impl From<BlockIndex> for Vec<Hash> {
    fn from(index: BlockIndex) -> Self {
        index.container
    }
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block id; fails if the id is already indexed
    pub fn push(&mut self, hash: Hash) -> bool {
        if self.index.contains_key(&hash) {
            return false;
        }
        self.index.insert(hash, self.container.len() as u32);
        self.container.push(hash);
        true
    }

    pub fn pop(&mut self) -> Option<Hash> {
        let hash = self.container.pop()?;
        self.index.remove(&hash);
        Some(hash)
    }

    pub fn clear(&mut self) {
        self.container.clear();
        self.index.clear();
    }

    pub fn size(&self) -> u32 {
        self.container.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn get_block_height(&self, hash: &Hash) -> Option<u32> {
        self.index.get(hash).copied()
    }

    pub fn get_block_id(&self, height: u32) -> Option<Hash> {
        self.container.get(height as usize).copied()
    }

    pub fn tail_id(&self) -> Option<Hash> {
        self.container.last().copied()
    }

    /// Up to `max_count` ids starting at `start_height`
    pub fn get_block_ids(&self, start_height: u32, max_count: usize) -> Vec<Hash> {
        self.container
            .iter()
            .skip(start_height as usize)
            .take(max_count)
            .copied()
            .collect()
    }

    /// Ids at distances 1, 2, 4, 8, ... below and including
    /// `start_block_id`, always ending with the genesis id.
    ///
    /// Returns an empty list for an unknown id.
    pub fn build_sparse_chain(&self, start_block_id: &Hash) -> Vec<Hash> {
        let end = match self.get_block_height(start_block_id) {
            Some(height) => height as usize + 1,
            None => return Vec::new(),
        };

        let mut result = Vec::new();
        let mut offset = 1;
        while offset <= end {
            result.push(self.container[end - offset]);
            offset *= 2;
        }
        if result.last() != self.container.first() {
            result.push(self.container[0]);
        }
        result
    }

    /// Height of the first id in `ids` that is on the main chain
    pub fn find_supplement(&self, ids: &[Hash]) -> Option<u32> {
        ids.iter().find_map(|id| self.get_block_height(id))
    }
}
