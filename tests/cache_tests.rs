//! Index caches across restarts

mod common;

use cn_core::crypto::Hash;
use cn_core::storage::cache::{CacheFile, BLOCKS_CACHE_VERSION};
use cn_core::storage::ChainIndices;
use common::{spend_coinbase, Node};

#[test]
fn test_cache_reused_when_tail_matches() {
    let node = Node::new();
    let blocks = node.mine_empty(&node.genesis(), 4);
    let tail = blocks.last().unwrap().tip.hash;

    let node = node.reopen(true);
    assert_eq!(node.chain.get_current_blockchain_height(), 5);
    assert_eq!(node.chain.get_tail_id(), tail);
    assert_eq!(node.chain.get_block_height(&blocks[1].tip.hash), Some(2));
    assert_eq!(node.chain.get_generated_transactions_number(4), Some(5));

    let [blocks_cache, _] = node.cache_files();
    let indices: ChainIndices = CacheFile::new(&blocks_cache, BLOCKS_CACHE_VERSION)
        .load(&tail)
        .unwrap()
        .unwrap();
    assert_eq!(indices.block_index.size(), 5);
    assert_eq!(indices.transaction_map.len(), 5);
}

#[test]
fn test_stale_cache_rebuilt() {
    let node = Node::new();
    let blocks = node.mine_empty(&node.genesis(), 11);
    node.chain.store_cache().unwrap();
    let cached_tail = node.chain.get_tail_id();

    // Grow the chain without refreshing the cache
    let tx = spend_coinbase(&node, &blocks[0], 1_000);
    assert!(node.add_to_pool(&tx, false));
    let block = node.mine_on_tail(&blocks.last().unwrap().tip, &[tx.clone()]);

    let node = node.reopen(false);
    let [blocks_cache, _] = node.cache_files();
    let bytes = std::fs::read(&blocks_cache).unwrap();
    assert_eq!(Hash::from_bytes(bytes[1..33].try_into().unwrap()), cached_tail);

    assert_eq!(node.chain.get_tail_id(), block.tip.hash);
    assert!(node.chain.have_transaction(&tx.hash()));
    assert_eq!(node.chain.get_total_transactions(), 14);
    assert_eq!(node.chain.get_generated_transactions_number(12), Some(14));
    assert!(node
        .chain
        .get_transaction_output_global_indexes(&tx.hash())
        .is_some_and(|indexes| indexes.len() == 1));
}

#[test]
fn test_outdated_cache_version_rebuilt() {
    let node = Node::new();
    node.mine_empty(&node.genesis(), 3);
    node.chain.store_cache().unwrap();

    let [blocks_cache, indices_cache] = node.cache_files();
    for path in [&blocks_cache, &indices_cache] {
        let mut bytes = std::fs::read(path).unwrap();
        bytes[0] = bytes[0].wrapping_add(1);
        std::fs::write(path, bytes).unwrap();
    }

    let node = node.reopen(false);
    assert_eq!(node.chain.get_current_blockchain_height(), 4);
    assert_eq!(node.chain.get_total_transactions(), 4);
    assert_eq!(node.chain.get_generated_transactions_number(3), Some(4));
}

#[test]
fn test_corrupt_cache_rebuilt() {
    let node = Node::new();
    node.mine_empty(&node.genesis(), 2);
    node.chain.store_cache().unwrap();

    let [blocks_cache, _] = node.cache_files();
    std::fs::write(&blocks_cache, [BLOCKS_CACHE_VERSION, 1, 2]).unwrap();

    let node = node.reopen(false);
    assert_eq!(node.chain.get_current_blockchain_height(), 3);
    assert_eq!(node.chain.get_total_transactions(), 3);
}

#[test]
fn test_fresh_start_discards_stored_blocks() {
    let node = Node::new();
    node.mine_empty(&node.genesis(), 2);
    let dir = node.dir;
    drop(node.chain);

    let pool = std::sync::Arc::new(std::sync::Mutex::new(cn_core::pool::MemoryPool::new()));
    let chain = cn_core::Blockchain::init(
        common::currency(),
        pool,
        cn_core::consensus::Checkpoints::new(),
        dir.path(),
        false,
    )
    .unwrap();
    assert_eq!(chain.get_current_blockchain_height(), 1);
}
