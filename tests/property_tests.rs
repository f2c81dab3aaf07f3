//! Property-based tests for consensus arithmetic and chain invariants
//!
//! These tests verify invariants hold under random inputs.

mod common;

use cn_core::consensus::{decompose_amount, get_penalized_amount, next_difficulty, DifficultyWindow};
use cn_core::crypto::{
    check_hash, check_ring_signature, generate_key_image, generate_ring_signature, hash_bytes, Hash, KeyPair,
};
use cn_core::storage::BlockIndex;
use cn_core::validation::{absolute_output_offsets_to_relative, relative_output_offsets_to_absolute};
use common::{mine_with, Node};
use proptest::prelude::*;

const WINDOW: DifficultyWindow = DifficultyWindow {
    window: 720,
    cut: 60,
    lag: 15,
    target: 120,
};

// ============================================================================
// CONSENSUS ARITHMETIC
// ============================================================================

proptest! {
    /// Denominations always add back up to the amount
    #[test]
    fn prop_decomposition_preserves_amount(amount in any::<u64>(), dust in 0u64..10_000_000) {
        let chunks = decompose_amount(amount, dust);
        prop_assert!(chunks.iter().all(|c| *c > 0));
        prop_assert_eq!(chunks.iter().map(|c| *c as u128).sum::<u128>(), amount as u128);
    }

    /// The size penalty never pays more than the unpenalized amount
    #[test]
    fn prop_penalty_never_increases(
        amount in any::<u64>(),
        median in 1u64..1_000_000,
        size in 0u64..2_000_000,
    ) {
        let paid = get_penalized_amount(amount, median, size);
        prop_assert!(paid <= amount);
        if size <= median {
            prop_assert_eq!(paid, amount);
        }
        if size >= 2 * median {
            prop_assert_eq!(paid, 0);
        }
    }

    /// Blocks arriving exactly on target keep the difficulty unchanged
    #[test]
    fn prop_difficulty_stable_on_target(
        difficulty in 1u64..1_000_000_000,
        samples in 2usize..600,
        start in 0u64..1_000_000_000,
    ) {
        let timestamps = (0..samples as u64).map(|i| start + i * WINDOW.target).collect();
        let cumulative = (1..=samples as u64).map(|i| i * difficulty).collect();
        prop_assert_eq!(next_difficulty(&WINDOW, timestamps, cumulative), difficulty);
    }

    /// Faster blocks never lower the difficulty
    #[test]
    fn prop_difficulty_rises_when_blocks_are_fast(
        difficulty in 1u64..1_000_000,
        samples in 2usize..300,
        spacing in 1u64..120,
    ) {
        let on_target = (0..samples as u64).map(|i| i * WINDOW.target).collect();
        let fast = (0..samples as u64).map(|i| i * spacing).collect();
        let cumulative: Vec<u64> = (1..=samples as u64).map(|i| i * difficulty).collect();
        prop_assert!(
            next_difficulty(&WINDOW, fast, cumulative.clone()) >= next_difficulty(&WINDOW, on_target, cumulative)
        );
    }

    /// A hash meeting a difficulty meets every lower one
    #[test]
    fn prop_check_hash_monotonic(bytes in any::<[u8; 32]>(), high in 1u64..u64::MAX, factor in 1u64..1000) {
        let hash = Hash::from_bytes(bytes);
        let low = (high / factor).max(1);
        if check_hash(&hash, high) {
            prop_assert!(check_hash(&hash, low));
        }
        prop_assert!(check_hash(&hash, 1));
    }

    /// Relative ring offsets resolve to the original sorted indexes
    #[test]
    fn prop_output_offsets_resolve(mut indexes in prop::collection::vec(0u32..1_000_000, 1..16)) {
        indexes.sort_unstable();
        let relative = absolute_output_offsets_to_relative(&indexes);
        prop_assert_eq!(relative_output_offsets_to_absolute(&relative), indexes);
    }
}

// ============================================================================
// INDICES AND SIGNATURES
// ============================================================================

proptest! {
    /// Sparse chains run from the start block down to genesis
    #[test]
    fn prop_sparse_chain_descends_to_genesis(length in 1u32..2_000, start in 0u32..2_000) {
        let mut index = BlockIndex::new();
        for i in 0..length {
            prop_assert!(index.push(hash_bytes(&i.to_le_bytes())));
        }
        let start = start % length;
        let start_id = index.get_block_id(start).unwrap();

        let sparse = index.build_sparse_chain(&start_id);
        prop_assert_eq!(sparse.first(), Some(&start_id));
        let genesis = index.get_block_id(0);
        prop_assert_eq!(sparse.last(), genesis.as_ref());

        let heights: Vec<u32> = sparse.iter().map(|id| index.get_block_height(id).unwrap()).collect();
        prop_assert!(heights.windows(2).all(|w| w[0] > w[1]));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A ring signature verifies for any ring position, and only for the
    /// message it signed
    #[test]
    fn prop_ring_signature_binds_message(ring_size in 1usize..6, real in 0usize..6, message in any::<[u8; 32]>()) {
        let real = real % ring_size;
        let owner = KeyPair::generate();
        let ring: Vec<_> = (0..ring_size)
            .map(|i| if i == real { owner.public_key } else { KeyPair::generate().public_key })
            .collect();
        let image = generate_key_image(&owner.public_key, &owner.secret_key);
        let prefix_hash = Hash::from_bytes(message);

        let signatures = generate_ring_signature(&prefix_hash, &image, &ring, &owner.secret_key, real).unwrap();
        prop_assert!(check_ring_signature(&prefix_hash, &image, &ring, &signatures));

        let mut other = message;
        other[0] ^= 1;
        prop_assert!(!check_ring_signature(&Hash::from_bytes(other), &image, &ring, &signatures));
    }
}

// ============================================================================
// CHAIN INVARIANTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    /// Cumulative difficulty never decreases along the main chain, and
    /// each block is credited the difficulty it was mined at
    #[test]
    fn prop_cumulative_difficulty_non_decreasing(gaps in prop::collection::vec(60u64..=240, 1..10)) {
        let node = Node::new();
        let mut tip = node.genesis();
        let mut expected = Vec::new();

        for gap in gaps {
            let difficulty = node.chain.get_difficulty_for_next_block();
            let mined = mine_with(node.chain.currency(), &tip, &[], tip.timestamp + gap, difficulty);
            let (accepted, context) = node.chain.add_new_block(&mined.block);
            prop_assert!(accepted, "{:?}", context);
            expected.push(difficulty);
            tip = mined.tip;
        }

        for (height, difficulty) in (1u32..).zip(expected) {
            let block_difficulty = node.chain.get_block_difficulty(height).unwrap();
            prop_assert!(block_difficulty >= 1);
            prop_assert_eq!(block_difficulty, difficulty);
        }
    }
}
