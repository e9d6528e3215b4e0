// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Ordered Merkle tree over a block's transactions.
//!
//! leaf = H( "Amunchain-Tx-Leaf-v1" || index(u64 BE) || H(item) )
//! node = H( "Amunchain-Tx-Node-v1" || left || right )
//!
//! Odd levels duplicate their last node. Binding the index into each leaf keeps
//! `[a, b, c]` and `[a, b, c, c]` from sharing a root.

use ring::digest;
use serde::{Deserialize, Serialize};

/// Hash32 type.
pub type Hash32 = [u8; 32];

const LEAF_DOMAIN: &[u8] = b"Amunchain-Tx-Leaf-v1";
const NODE_DOMAIN: &[u8] = b"Amunchain-Tx-Node-v1";

/// Side of sibling in proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Sibling is left.
    Left,
    /// Sibling is right.
    Right,
}

/// One proof item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofItem {
    /// Whether sibling is left or right of current hash.
    pub side: Side,
    /// Sibling hash.
    pub sibling: Hash32,
}

/// Merkle inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Position of the proven item.
    pub index: u64,
    /// Leaf hash.
    pub leaf: Hash32,
    /// Path items from leaf to root.
    pub path: Vec<ProofItem>,
}

pub(crate) fn sha256(data: &[u8]) -> Hash32 {
    let d = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// Leaf hash for `item` at `index`.
pub fn hash_leaf(index: u64, item: &[u8]) -> Hash32 {
    let hi = sha256(item);
    let mut buf = Vec::with_capacity(LEAF_DOMAIN.len() + 8 + 32);
    buf.extend_from_slice(LEAF_DOMAIN);
    buf.extend_from_slice(&index.to_be_bytes());
    buf.extend_from_slice(&hi);
    sha256(&buf)
}

fn hash_node(left: Hash32, right: Hash32) -> Hash32 {
    let mut buf = Vec::with_capacity(NODE_DOMAIN.len() + 32 + 32);
    buf.extend_from_slice(NODE_DOMAIN);
    buf.extend_from_slice(&left);
    buf.extend_from_slice(&right);
    sha256(&buf)
}

fn next_level(level: &[Hash32]) -> Vec<Hash32> {
    level
        .chunks(2)
        .map(|pair| hash_node(pair[0], *pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Root over ordered items. Empty input yields the zero hash.
pub fn merkle_root(items: &[Vec<u8>]) -> Hash32 {
    if items.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash32> = items
        .iter()
        .enumerate()
        .map(|(i, it)| hash_leaf(i as u64, it))
        .collect();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Inclusion proof for the item at `index`.
pub fn merkle_proof(items: &[Vec<u8>], index: usize) -> Option<MerkleProof> {
    if index >= items.len() {
        return None;
    }

    let mut level: Vec<Hash32> = items
        .iter()
        .enumerate()
        .map(|(i, it)| hash_leaf(i as u64, it))
        .collect();
    let leaf = level[index];
    let mut idx = index;
    let mut path = Vec::new();

    while level.len() > 1 {
        let is_right = idx % 2 == 1;
        let sib_idx = if is_right { idx - 1 } else { idx + 1 };
        let sibling = *level.get(sib_idx).unwrap_or(&level[idx]);
        path.push(ProofItem {
            side: if is_right { Side::Left } else { Side::Right },
            sibling,
        });
        level = next_level(&level);
        idx /= 2;
    }

    Some(MerkleProof { index: index as u64, leaf, path })
}

/// Verify that `item` is covered by `root` at the proof's index.
pub fn verify_proof(root: Hash32, item: &[u8], proof: &MerkleProof) -> bool {
    if hash_leaf(proof.index, item) != proof.leaf {
        return false;
    }
    let mut cur = proof.leaf;
    for step in proof.path.iter() {
        cur = match step.side {
            Side::Left => hash_node(step.sibling, cur),
            Side::Right => hash_node(cur, step.sibling),
        };
    }
    cur == root
}
