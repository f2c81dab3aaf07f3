//! Tree hash
//!
//! Computes the transaction tree root that goes into a block's hashing
//! blob, and the branches used by merge mining to prove that a leaf is
//! committed to by a root.

use super::{hash_pair, Hash};

/// Largest power of two that is `<= n - 1`, for `n >= 3`.
fn split_width(n: usize) -> usize {
    1 << (usize::BITS - 1 - (n - 1).leading_zeros())
}

/// Pairs up the tail of `hashes` so the result has a power-of-two length.
fn first_level(hashes: &[Hash]) -> Vec<Hash> {
    let n = hashes.len();
    let cnt = split_width(n);
    let direct = 2 * cnt - n;

    let mut level: Vec<Hash> = hashes[..direct].to_vec();
    for pair in hashes[direct..].chunks(2) {
        level.push(hash_pair(&pair[0], &pair[1]));
    }
    level
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level.chunks(2).map(|c| hash_pair(&c[0], &c[1])).collect()
}

/// Compute the tree hash of a list of hashes.
///
/// Empty input yields the zero hash, a single hash is its own root.
pub fn tree_hash(hashes: &[Hash]) -> Hash {
    match hashes.len() {
        0 => Hash::zero(),
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        _ => {
            let mut level = first_level(hashes);
            while level.len() > 2 {
                level = next_level(&level);
            }
            hash_pair(&level[0], &level[1])
        }
    }
}

/// Branch proving the first hash of `hashes` against `tree_hash(hashes)`.
///
/// Ordered from the root level down, so `branch[len - 1]` is the
/// sibling of the leaf itself.
pub fn tree_branch(hashes: &[Hash]) -> Vec<Hash> {
    let mut siblings = Vec::new();
    match hashes.len() {
        0 | 1 => {}
        2 => siblings.push(hashes[1]),
        n => {
            if 2 * split_width(n) == n {
                siblings.push(hashes[1]);
            }
            let mut level = first_level(hashes);
            while level.len() > 1 {
                siblings.push(level[1]);
                level = next_level(&level);
            }
        }
    }
    siblings.reverse();
    siblings
}

/// Fold a leaf up through `branch`.
///
/// Bit `depth` of `path` selects whether the leaf side sits on the right
/// at that level; without a path the leaf is always on the left.
pub fn tree_hash_from_branch(branch: &[Hash], leaf: &Hash, path: Option<&Hash>) -> Hash {
    let mut current = *leaf;
    for depth in (0..branch.len()).rev() {
        let leaf_is_right = path
            .map(|p| p.0[(depth >> 3) % 32] & (1 << (depth & 7)) != 0)
            .unwrap_or(false);
        current = if leaf_is_right {
            hash_pair(&branch[depth], &current)
        } else {
            hash_pair(&current, &branch[depth])
        };
    }
    current
}
