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

//! Blocks: header + ordered transactions.
//!
//! Block hash = SHA-256 over
//! `"Amunchain-Block-v1" || has_parent(1) || parent(32)? || height || timestamp_ms
//!  || producer(20) || tx_root(32) || len(extra)(u64 BE) || extra`,
//! where `tx_root` is always recomputed from the body. Parents are referenced by
//! hash only, so blocks live in a hash-indexed arena rather than linking to
//! each other.

use serde::{Deserialize, Serialize};

use crate::core::{
    chain::merkle::{merkle_proof, merkle_root, sha256, MerkleProof},
    tx::Transaction,
    types::{decode_canonical_limited, encode_canonical, Address, CodecError, H256},
};

const BLOCK_DOMAIN: &[u8] = b"Amunchain-Block-v1";

/// Upper bound on an encoded block.
pub const MAX_BLOCK_BYTES: usize = 8 * 1024 * 1024;

/// Block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Parent block hash; `None` only for genesis.
    pub parent_hash: Option<H256>,
    /// Position in the chain (genesis = 0).
    pub height: u64,
    /// Producer wall clock, ms since UNIX epoch.
    pub timestamp_ms: u64,
    /// Producer identity.
    pub producer: Address,
    /// Merkle root of the body.
    pub tx_root: H256,
    /// Free-form bytes (genesis stores its allocation commitment here).
    pub extra: Vec<u8>,
}

/// Caller-supplied header fields for a new block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMetadata {
    /// Height of the new block.
    pub height: u64,
    /// Timestamp in ms.
    pub timestamp_ms: u64,
    /// Producer.
    pub producer: Address,
    /// Free-form bytes.
    pub extra: Vec<u8>,
}

/// Header plus ordered transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header.
    pub header: BlockHeader,
    /// Ordered body.
    pub transactions: Vec<Transaction>,
}

/// Leaf bytes of one transaction: signing bytes, then the length-prefixed signature.
pub fn tx_leaf_bytes(tx: &Transaction) -> Vec<u8> {
    let mut out = tx.signing_bytes();
    let sig = tx.signature.as_deref().unwrap_or(&[]);
    out.push(u8::from(tx.signature.is_some()));
    out.extend_from_slice(&(sig.len() as u64).to_be_bytes());
    out.extend_from_slice(sig);
    out
}

/// Merkle root over the ordered transactions.
pub fn compute_tx_root(transactions: &[Transaction]) -> H256 {
    let leaves: Vec<Vec<u8>> = transactions.iter().map(tx_leaf_bytes).collect();
    H256::from_bytes(merkle_root(&leaves))
}

/// Deterministic block hash over the header and the full body.
pub fn compute_block_hash(block: &Block) -> H256 {
    let h = &block.header;
    let tx_root = compute_tx_root(&block.transactions);

    let mut buf = Vec::with_capacity(BLOCK_DOMAIN.len() + 1 + 32 + 16 + 20 + 32 + 8 + h.extra.len());
    buf.extend_from_slice(BLOCK_DOMAIN);
    match &h.parent_hash {
        Some(p) => {
            buf.push(1);
            buf.extend_from_slice(p.as_bytes());
        }
        None => buf.push(0),
    }
    buf.extend_from_slice(&h.height.to_be_bytes());
    buf.extend_from_slice(&h.timestamp_ms.to_be_bytes());
    buf.extend_from_slice(h.producer.as_bytes());
    buf.extend_from_slice(tx_root.as_bytes());
    buf.extend_from_slice(&(h.extra.len() as u64).to_be_bytes());
    buf.extend_from_slice(&h.extra);
    H256::from_bytes(sha256(&buf))
}

impl Block {
    /// Build a block on top of `parent_hash`. Does not make it canonical.
    pub fn append(parent_hash: H256, transactions: Vec<Transaction>, meta: BlockMetadata) -> Self {
        let tx_root = compute_tx_root(&transactions);
        Self {
            header: BlockHeader {
                parent_hash: Some(parent_hash),
                height: meta.height,
                timestamp_ms: meta.timestamp_ms,
                producer: meta.producer,
                tx_root,
                extra: meta.extra,
            },
            transactions,
        }
    }

    /// [`compute_block_hash`].
    pub fn hash(&self) -> H256 {
        compute_block_hash(self)
    }

    /// True when the header root matches the body.
    pub fn tx_root_matches(&self) -> bool {
        compute_tx_root(&self.transactions) == self.header.tx_root
    }

    /// Inclusion proof for the transaction at `index`, checked with
    /// [`crate::core::chain::merkle::verify_proof`] against `header.tx_root`
    /// and [`tx_leaf_bytes`].
    pub fn prove_transaction(&self, index: usize) -> Option<MerkleProof> {
        let leaves: Vec<Vec<u8>> = self.transactions.iter().map(tx_leaf_bytes).collect();
        merkle_proof(&leaves, index)
    }

    /// Binary encoding for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode_canonical(self)
    }

    /// Decode [`Block::to_bytes`] output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_canonical_limited(bytes, MAX_BLOCK_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::merkle::verify_proof;

    fn tx(nonce: u64) -> Transaction {
        Transaction::new(Address::from_bytes([1; 20]), Address::from_bytes([2; 20]), 5u64, vec![], nonce)
            .unwrap()
    }

    fn meta() -> BlockMetadata {
        BlockMetadata {
            height: 1,
            timestamp_ms: 1_700_000_000_000,
            producer: Address::from_bytes([7; 20]),
            extra: vec![],
        }
    }

    #[test]
    fn identical_contents_hash_identically() {
        let parent = H256::from_bytes([3; 32]);
        let a = Block::append(parent, vec![tx(0), tx(1)], meta());
        let b = Block::append(parent, vec![tx(0), tx(1)], meta());
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn order_parent_and_signature_all_matter() {
        let parent = H256::from_bytes([3; 32]);
        let base = Block::append(parent, vec![tx(0), tx(1)], meta());

        let swapped = Block::append(parent, vec![tx(1), tx(0)], meta());
        assert_ne!(base.hash(), swapped.hash());

        let other_parent = Block::append(H256::from_bytes([4; 32]), vec![tx(0), tx(1)], meta());
        assert_ne!(base.hash(), other_parent.hash());

        let mut signed = base.clone();
        signed.transactions[0].signature = Some(vec![1; 65]);
        assert_ne!(base.hash(), signed.hash());
    }

    #[test]
    fn body_tampering_is_detected_by_root() {
        let mut b = Block::append(H256::ZERO, vec![tx(0)], meta());
        assert!(b.tx_root_matches());
        b.transactions.push(tx(1));
        assert!(!b.tx_root_matches());
    }

    #[test]
    fn storage_encoding_roundtrips_hash() {
        let b = Block::append(H256::ZERO, vec![tx(0), tx(1), tx(2)], meta());
        let back = Block::from_bytes(&b.to_bytes().unwrap()).unwrap();
        assert_eq!(back.hash(), b.hash());
    }

    #[test]
    fn transaction_inclusion_proofs_verify() {
        let b = Block::append(H256::ZERO, vec![tx(0), tx(1), tx(2)], meta());
        let p = b.prove_transaction(2).unwrap();
        assert!(verify_proof(*b.header.tx_root.as_bytes(), &tx_leaf_bytes(&b.transactions[2]), &p));
        assert!(b.prove_transaction(3).is_none());
    }
}
