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

//! The node's canonical chain, persisted through [`KeyValueStorer`].
//!
//! Layout:
//! - `block-<hash>`   encoded [`Block`]
//! - `height-<h BE>`  canonical hash at height `h`
//! - `head`           canonical head hash
//! - `genesis`        genesis hash
//! - `nonce-<addr>`   next expected nonce (u64 BE)
//!
//! Every state change is one `write_batch`, so a crash never leaves a
//! half-accepted block behind.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    core::{
        chain::{
            block::{Block, BlockMetadata},
            genesis::GenesisBlock,
        },
        storage::kv::{KeyValueStorer, KvError, KvOp},
        tx::Transaction,
        types::{Address, CodecError, H256},
    },
    monitoring::metrics::Metrics,
};

const HEAD_KEY: &[u8] = b"head";
const GENESIS_KEY: &[u8] = b"genesis";

/// Chain errors. Any rejection leaves the chain unchanged.
#[derive(Debug, Error)]
pub enum ChainError {
    /// No genesis loaded yet.
    #[error("chain not initialized")]
    NotInitialized,
    /// Stored genesis differs from the one supplied.
    #[error("genesis mismatch: stored {stored}, supplied {supplied}")]
    GenesisMismatch {
        /// Hash already on disk.
        stored: H256,
        /// Hash offered.
        supplied: H256,
    },
    /// Non-genesis block without a parent reference.
    #[error("block has no parent")]
    MissingParent,
    /// Parent is not the canonical head.
    #[error("parent mismatch: expected {expected}, got {got}")]
    ParentMismatch {
        /// Canonical head.
        expected: H256,
        /// Block's parent.
        got: H256,
    },
    /// Height is not head + 1.
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch {
        /// Required height.
        expected: u64,
        /// Block's height.
        got: u64,
    },
    /// Header root does not match the body.
    #[error("tx root mismatch")]
    TxRootMismatch,
    /// Transaction at index is unsigned.
    #[error("transaction {0} is unsigned")]
    UnsignedTransaction(usize),
    /// Transaction at index fails verification.
    #[error("transaction {0} has an invalid signature")]
    BadSignature(usize),
    /// Sender nonce out of sequence.
    #[error("nonce mismatch for {sender}: expected {expected}, got {got}")]
    NonceMismatch {
        /// Sender.
        sender: Address,
        /// Next expected nonce.
        expected: u64,
        /// Nonce carried.
        got: u64,
    },
    /// Store failure.
    #[error("storage: {0}")]
    Storage(String),
    /// Stored data does not decode.
    #[error("corrupt chain data")]
    Corrupt,
}

impl From<KvError> for ChainError {
    fn from(e: KvError) -> Self {
        ChainError::Storage(e.to_string())
    }
}

impl From<CodecError> for ChainError {
    fn from(_: CodecError) -> Self {
        ChainError::Corrupt
    }
}

/// Lifecycle: `Uninitialized -> GenesisLoaded -> Synced{height}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    /// No genesis.
    Uninitialized,
    /// Genesis is the head.
    GenesisLoaded,
    /// Head above genesis.
    Synced {
        /// Head height.
        height: u64,
    },
}

/// Canonical head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainHead {
    /// Head hash.
    pub hash: H256,
    /// Head height.
    pub height: u64,
}

struct ChainInner {
    head: Option<ChainHead>,
}

impl ChainInner {
    fn status(&self) -> ChainStatus {
        match self.head {
            None => ChainStatus::Uninitialized,
            Some(h) if h.height == 0 => ChainStatus::GenesisLoaded,
            Some(h) => ChainStatus::Synced { height: h.height },
        }
    }
}

/// Hash-linked canonical chain.
pub struct Chain {
    store: Arc<dyn KeyValueStorer>,
    inner: Mutex<ChainInner>,
    metrics: Option<Arc<Metrics>>,
}

fn block_key(hash: &H256) -> Vec<u8> {
    let mut k = b"block-".to_vec();
    k.extend_from_slice(hash.as_bytes());
    k
}

fn height_key(height: u64) -> Vec<u8> {
    let mut k = b"height-".to_vec();
    k.extend_from_slice(&height.to_be_bytes());
    k
}

fn nonce_key(addr: &Address) -> Vec<u8> {
    let mut k = b"nonce-".to_vec();
    k.extend_from_slice(addr.as_bytes());
    k
}

fn decode_hash(bytes: &[u8]) -> Result<H256, ChainError> {
    let arr: [u8; 32] = bytes.try_into().map_err(|_| ChainError::Corrupt)?;
    Ok(H256::from_bytes(arr))
}

impl Chain {
    /// Open the chain over `store`, recovering a persisted head if any.
    pub fn open(store: Arc<dyn KeyValueStorer>) -> Result<Self, ChainError> {
        let head = match store.get(HEAD_KEY)? {
            None => None,
            Some(raw) => {
                let hash = decode_hash(&raw)?;
                let bytes = store.get(&block_key(&hash))?.ok_or(ChainError::Corrupt)?;
                let block = Block::from_bytes(&bytes)?;
                Some(ChainHead { hash, height: block.header.height })
            }
        };
        if let Some(h) = head {
            info!(head = %h.hash, height = h.height, "chain recovered");
        }
        Ok(Self { store, inner: Mutex::new(ChainInner { head }), metrics: None })
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        if let Ok(inner) = self.inner.lock() {
            if let Some(h) = inner.head {
                metrics.block_height.set(h.height as i64);
            }
        }
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainInner>, ChainError> {
        self.inner
            .lock()
            .map_err(|_| ChainError::Storage("chain lock poisoned".to_string()))
    }

    /// Make `genesis` the head of an empty chain. Re-initializing with the
    /// same genesis is a no-op; a different one fails.
    pub fn initialize(&self, genesis: &GenesisBlock) -> Result<H256, ChainError> {
        let mut inner = self.lock()?;
        let hash = genesis.hash();

        if let Some(stored) = self.store.get(GENESIS_KEY)? {
            let stored = decode_hash(&stored)?;
            if stored != hash {
                warn!(%stored, supplied = %hash, "refusing foreign genesis");
                return Err(ChainError::GenesisMismatch { stored, supplied: hash });
            }
            return Ok(hash);
        }

        let ops = vec![
            KvOp::Put { key: block_key(&hash), value: genesis.block.to_bytes()? },
            KvOp::Put { key: height_key(0), value: hash.as_bytes().to_vec() },
            KvOp::Put { key: HEAD_KEY.to_vec(), value: hash.as_bytes().to_vec() },
            KvOp::Put { key: GENESIS_KEY.to_vec(), value: hash.as_bytes().to_vec() },
        ];
        self.store.write_batch(ops)?;
        inner.head = Some(ChainHead { hash, height: 0 });
        if let Some(m) = &self.metrics {
            m.block_height.set(0);
        }
        info!(genesis = %hash, chain_id = %genesis.chain_id, "genesis loaded");
        Ok(hash)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ChainStatus {
        self.inner
            .lock()
            .map(|i| i.status())
            .unwrap_or(ChainStatus::Uninitialized)
    }

    /// Canonical head, if initialized.
    pub fn head(&self) -> Option<ChainHead> {
        self.inner.lock().ok().and_then(|i| i.head)
    }

    /// The hash this node reports during consensus.
    pub fn canonical_hash(&self) -> Result<H256, ChainError> {
        self.lock()?.head.map(|h| h.hash).ok_or(ChainError::NotInitialized)
    }

    /// Block by hash.
    pub fn block_by_hash(&self, hash: &H256) -> Result<Option<Block>, ChainError> {
        match self.store.get(&block_key(hash))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Block::from_bytes(&bytes)?)),
        }
    }

    /// Canonical block at `height`.
    pub fn block_at_height(&self, height: u64) -> Result<Option<Block>, ChainError> {
        match self.store.get(&height_key(height))? {
            None => Ok(None),
            Some(raw) => self.block_by_hash(&decode_hash(&raw)?),
        }
    }

    /// Next nonce `sender` must use.
    pub fn next_nonce(&self, sender: &Address) -> Result<u64, ChainError> {
        match self.store.get(&nonce_key(sender))? {
            None => Ok(0),
            Some(raw) => {
                let arr: [u8; 8] = raw.as_slice().try_into().map_err(|_| ChainError::Corrupt)?;
                Ok(u64::from_be_bytes(arr))
            }
        }
    }

    /// Assemble (without accepting) the next block on the current head.
    pub fn build_next_block(
        &self,
        transactions: Vec<Transaction>,
        producer: Address,
        timestamp_ms: u64,
        extra: Vec<u8>,
    ) -> Result<Block, ChainError> {
        let head = self.lock()?.head.ok_or(ChainError::NotInitialized)?;
        Ok(Block::append(
            head.hash,
            transactions,
            BlockMetadata { height: head.height + 1, timestamp_ms, producer, extra },
        ))
    }

    /// Validate `block` against the head and make it canonical.
    pub fn accept_block(&self, block: Block) -> Result<H256, ChainError> {
        let mut inner = self.lock()?;
        let head = inner.head.ok_or(ChainError::NotInitialized)?;

        let result = self.check_block(&head, &block);
        let nonces = match result {
            Ok(n) => n,
            Err(e) => {
                warn!(height = block.header.height, error = %e, "block rejected");
                return Err(e);
            }
        };

        let hash = block.hash();
        let mut ops = vec![
            KvOp::Put { key: block_key(&hash), value: block.to_bytes()? },
            KvOp::Put { key: height_key(block.header.height), value: hash.as_bytes().to_vec() },
            KvOp::Put { key: HEAD_KEY.to_vec(), value: hash.as_bytes().to_vec() },
        ];
        for (sender, next) in nonces.iter() {
            ops.push(KvOp::Put { key: nonce_key(sender), value: next.to_be_bytes().to_vec() });
        }
        self.store.write_batch(ops)?;

        let height = block.header.height;
        inner.head = Some(ChainHead { hash, height });
        if let Some(m) = &self.metrics {
            m.block_height.set(height as i64);
            m.transactions_total.inc_by(block.transactions.len() as u64);
        }
        info!(%hash, height, txs = block.transactions.len(), "block accepted");
        Ok(hash)
    }

    /// Returns the updated nonce table on success.
    fn check_block(&self, head: &ChainHead, block: &Block) -> Result<BTreeMap<Address, u64>, ChainError> {
        let parent = block.header.parent_hash.ok_or(ChainError::MissingParent)?;
        if parent != head.hash {
            return Err(ChainError::ParentMismatch { expected: head.hash, got: parent });
        }
        let expected_height = head.height + 1;
        if block.header.height != expected_height {
            return Err(ChainError::HeightMismatch { expected: expected_height, got: block.header.height });
        }
        if !block.tx_root_matches() {
            return Err(ChainError::TxRootMismatch);
        }

        let mut nonces: BTreeMap<Address, u64> = BTreeMap::new();
        for (i, tx) in block.transactions.iter().enumerate() {
            if !tx.is_signed() {
                return Err(ChainError::UnsignedTransaction(i));
            }
            if !tx.verify() {
                return Err(ChainError::BadSignature(i));
            }
            let expected = match nonces.get(&tx.from) {
                Some(n) => *n,
                None => self.next_nonce(&tx.from)?,
            };
            if tx.nonce != expected {
                return Err(ChainError::NonceMismatch { sender: tx.from, expected, got: tx.nonce });
            }
            nonces.insert(tx.from, expected + 1);
            debug!(index = i, tx = %tx.hash(), "transaction checked");
        }
        Ok(nonces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        chain::genesis::load_genesis, security::keystore::SigningKey, storage::kv::SledStore,
    };

    fn chain() -> (Chain, GenesisBlock) {
        let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::temporary().unwrap());
        let c = Chain::open(store).unwrap();
        let g = load_genesis(None).unwrap();
        c.initialize(&g).unwrap();
        (c, g)
    }

    fn signed_tx(key: &SigningKey, nonce: u64) -> Transaction {
        let mut tx = Transaction::new(key.address(), Address::from_bytes([9; 20]), 10u64, vec![], nonce).unwrap();
        tx.sign(key).unwrap();
        tx
    }

    #[test]
    fn lifecycle_moves_from_uninitialized_to_synced() {
        let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::temporary().unwrap());
        let c = Chain::open(store).unwrap();
        assert_eq!(c.status(), ChainStatus::Uninitialized);
        assert!(matches!(c.canonical_hash(), Err(ChainError::NotInitialized)));

        let g = load_genesis(None).unwrap();
        assert_eq!(c.initialize(&g).unwrap(), g.hash());
        assert_eq!(c.status(), ChainStatus::GenesisLoaded);
        assert_eq!(c.initialize(&g).unwrap(), g.hash());

        let b = c.build_next_block(vec![], Address::from_bytes([1; 20]), 1, vec![]).unwrap();
        let h = c.accept_block(b).unwrap();
        assert_eq!(c.status(), ChainStatus::Synced { height: 1 });
        assert_eq!(c.canonical_hash().unwrap(), h);
        assert_eq!(c.block_at_height(1).unwrap().unwrap().hash(), h);
    }

    #[test]
    fn wrong_parent_and_height_are_rejected() {
        let (c, g) = chain();
        let producer = Address::from_bytes([1; 20]);

        let stray = Block::append(
            H256::from_bytes([5; 32]),
            vec![],
            BlockMetadata { height: 1, timestamp_ms: 1, producer, extra: vec![] },
        );
        assert!(matches!(c.accept_block(stray), Err(ChainError::ParentMismatch { .. })));

        let skip = Block::append(
            g.hash(),
            vec![],
            BlockMetadata { height: 2, timestamp_ms: 1, producer, extra: vec![] },
        );
        assert!(matches!(c.accept_block(skip), Err(ChainError::HeightMismatch { expected: 1, got: 2 })));
        assert_eq!(c.canonical_hash().unwrap(), g.hash());
    }

    #[test]
    fn nonces_must_be_contiguous() {
        let (c, _) = chain();
        let key = SigningKey::generate().unwrap();
        let producer = Address::from_bytes([1; 20]);

        let gap = c.build_next_block(vec![signed_tx(&key, 1)], producer, 1, vec![]).unwrap();
        assert!(matches!(c.accept_block(gap), Err(ChainError::NonceMismatch { expected: 0, got: 1, .. })));

        let ok = c
            .build_next_block(vec![signed_tx(&key, 0), signed_tx(&key, 1)], producer, 1, vec![])
            .unwrap();
        c.accept_block(ok).unwrap();
        assert_eq!(c.next_nonce(&key.address()).unwrap(), 2);

        let replay = c.build_next_block(vec![signed_tx(&key, 1)], producer, 2, vec![]).unwrap();
        assert!(matches!(c.accept_block(replay), Err(ChainError::NonceMismatch { expected: 2, .. })));
    }

    #[test]
    fn unsigned_and_tampered_transactions_are_rejected() {
        let (c, _) = chain();
        let key = SigningKey::generate().unwrap();
        let producer = Address::from_bytes([1; 20]);

        let unsigned = Transaction::new(key.address(), producer, 1u64, vec![], 0).unwrap();
        let b = c.build_next_block(vec![unsigned], producer, 1, vec![]).unwrap();
        assert!(matches!(c.accept_block(b), Err(ChainError::UnsignedTransaction(0))));

        let mut forged = signed_tx(&key, 0);
        forged.data = vec![1];
        let b = c.build_next_block(vec![forged], producer, 1, vec![]).unwrap();
        assert!(matches!(c.accept_block(b), Err(ChainError::BadSignature(0))));

        let mut b = c.build_next_block(vec![signed_tx(&key, 0)], producer, 1, vec![]).unwrap();
        b.transactions.clear();
        assert!(matches!(c.accept_block(b), Err(ChainError::TxRootMismatch)));
    }

    #[test]
    fn reopened_chain_recovers_head_and_refuses_other_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let head = {
            let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::open(path.to_str().unwrap()).unwrap());
            let c = Chain::open(store.clone()).unwrap();
            c.initialize(&load_genesis(None).unwrap()).unwrap();
            let b = c.build_next_block(vec![], Address::from_bytes([1; 20]), 1, vec![]).unwrap();
            let h = c.accept_block(b).unwrap();
            store.close().unwrap();
            h
        };

        let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::open(path.to_str().unwrap()).unwrap());
        let c = Chain::open(store).unwrap();
        assert_eq!(c.head(), Some(ChainHead { hash: head, height: 1 }));

        let mut other = load_genesis(None).unwrap();
        other.block.header.timestamp_ms += 1;
        assert!(matches!(c.initialize(&other), Err(ChainError::GenesisMismatch { .. })));
    }
}
