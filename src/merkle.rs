//! Merkle trees over file segments and block contents
//!
//! Leaf = SHA-256(0x00 || data)
//! Internal nodes = SHA-256(0x01 || left || right)
//! An odd node at the end of a level is paired with itself.
//!
//! Storage proofs carry only the sibling hashes that are not the proven node
//! itself, so the verifier derives each sibling's side from the segment index.

use sha2::{Digest, Sha256};

use crate::constants::SEGMENT_SIZE;
use crate::types::Hash;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    finish(hasher)
}

pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    finish(hasher)
}

fn finish(hasher: Sha256) -> Hash {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Root over arbitrary leaves; the empty tree hashes to all zeros.
pub fn merkle_root<'a, I>(leaves: I) -> Hash
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let level: Vec<Hash> = leaves.into_iter().map(leaf_hash).collect();
    root_from_level(level)
}

fn root_from_level(mut level: Vec<Hash>) -> Hash {
    if level.is_empty() {
        return [0u8; 32];
    }
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .filter_map(|pair| match pair {
            [left, rest @ ..] => Some(node_hash(left, rest.first().unwrap_or(left))),
            [] => None,
        })
        .collect()
}

/// Number of segments a file of `file_size` bytes is split into
pub fn segment_count(file_size: u64) -> u64 {
    file_size.div_ceil(SEGMENT_SIZE as u64)
}

/// Expected length of segment `index` of a file
pub fn segment_len(file_size: u64, index: u64) -> usize {
    let start = index * SEGMENT_SIZE as u64;
    (file_size.saturating_sub(start)).min(SEGMENT_SIZE as u64) as usize
}

/// Merkle root committed by a file contract
pub fn file_merkle_root(data: &[u8]) -> Hash {
    merkle_root(data.chunks(SEGMENT_SIZE))
}

/// Build the segment and hash set proving segment `index` of `data`.
pub fn build_storage_proof(data: &[u8], index: u64) -> Option<(Vec<u8>, Vec<Hash>)> {
    let segments: Vec<&[u8]> = data.chunks(SEGMENT_SIZE).collect();
    let index = usize::try_from(index).ok()?;
    let segment = segments.get(index)?.to_vec();

    let mut level: Vec<Hash> = segments.iter().map(|s| leaf_hash(s)).collect();
    let mut idx = index;
    let mut hash_set = Vec::new();
    while level.len() > 1 {
        let sibling = idx ^ 1;
        if sibling < level.len() {
            hash_set.push(level[sibling]);
        }
        level = next_level(&level);
        idx /= 2;
    }
    Some((segment, hash_set))
}

/// Verify that `segment` is segment `index` of a file with `num_segments`
/// segments and Merkle root `root`.
pub fn verify_segment(
    segment: &[u8],
    hash_set: &[Hash],
    num_segments: u64,
    index: u64,
    root: &Hash,
) -> bool {
    if index >= num_segments {
        return false;
    }
    let mut current = leaf_hash(segment);
    let mut idx = index;
    let mut width = num_segments;
    let mut proof = hash_set.iter();
    while width > 1 {
        if idx % 2 == 1 {
            match proof.next() {
                Some(left) => current = node_hash(left, &current),
                None => return false,
            }
        } else if idx + 1 < width {
            match proof.next() {
                Some(right) => current = node_hash(&current, right),
                None => return false,
            }
        } else {
            current = node_hash(&current, &current);
        }
        idx /= 2;
        width = width.div_ceil(2);
    }
    proof.next().is_none() && current == *root
}
