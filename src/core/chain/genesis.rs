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

//! Genesis definition, loaded from TOML (bundled or operator supplied).
//!
//! ```text
//! chain_id = "amunchain-ledger-1"
//! timestamp_ms = 1767225600000
//! producer = "0x..."
//! extra_data = "0x..."          # optional
//! [alloc]
//! "0x<address>" = "<decimal balance>"
//! ```
//!
//! The header `extra` commits to the whole definition:
//! `len(chain_id) || chain_id || count || (address || len(balance) || balance)* || extra_data`,
//! lengths and count as u64 BE.
//!
//! The chain keeps no balance state. `alloc` exists only so that nodes with
//! different initial allocations derive different genesis hashes and refuse
//! each other's chains.

use num_bigint::BigUint;
use serde::Deserialize;
use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path};
use thiserror::Error;

use crate::core::{
    chain::block::{compute_tx_root, Block, BlockHeader},
    types::{decode_hex_prefixed, Address, H256},
};

const BUNDLED_GENESIS: &str = include_str!("../../../genesis.toml");

/// Genesis loading errors (storage class: missing or malformed source).
#[derive(Debug, Error)]
pub enum GenesisError {
    /// Definition file is absent or unreadable.
    #[error("genesis source missing: {0}")]
    Missing(String),
    /// Definition does not parse.
    #[error("genesis malformed: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GenesisFile {
    chain_id: String,
    timestamp_ms: u64,
    producer: String,
    #[serde(default)]
    extra_data: String,
    #[serde(default)]
    alloc: BTreeMap<String, String>,
}

/// The unique parentless block plus the definition it was built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenesisBlock {
    /// Network identifier.
    pub chain_id: String,
    /// Initial balances; committed into the genesis hash, not tracked afterwards.
    pub alloc: BTreeMap<Address, BigUint>,
    /// Height-0 block.
    pub block: Block,
}

impl GenesisBlock {
    /// Genesis hash.
    pub fn hash(&self) -> H256 {
        self.block.hash()
    }
}

/// Load the genesis from `path`, or the bundled definition when `None`.
/// Pure: repeated calls yield blocks with the same hash.
pub fn load_genesis(path: Option<&Path>) -> Result<GenesisBlock, GenesisError> {
    match path {
        None => parse_genesis(BUNDLED_GENESIS),
        Some(p) => {
            let raw = fs::read_to_string(p).map_err(|e| match e.kind() {
                ErrorKind::NotFound => GenesisError::Missing(p.display().to_string()),
                _ => GenesisError::Missing(format!("{}: {e}", p.display())),
            })?;
            parse_genesis(&raw)
        }
    }
}

/// Parse a TOML genesis definition.
pub fn parse_genesis(raw: &str) -> Result<GenesisBlock, GenesisError> {
    let file: GenesisFile = toml::from_str(raw).map_err(|e| GenesisError::Malformed(e.to_string()))?;

    if file.chain_id.trim().is_empty() {
        return Err(GenesisError::Malformed("chain_id is empty".to_string()));
    }
    let producer: Address = file
        .producer
        .parse()
        .map_err(|e| GenesisError::Malformed(format!("producer: {e}")))?;
    let extra_data = if file.extra_data.is_empty() {
        Vec::new()
    } else {
        decode_hex_prefixed(&file.extra_data)
            .map_err(|e| GenesisError::Malformed(format!("extra_data: {e}")))?
    };

    let mut alloc = BTreeMap::new();
    for (addr, balance) in file.alloc.iter() {
        let a: Address = addr
            .parse()
            .map_err(|e| GenesisError::Malformed(format!("alloc {addr}: {e}")))?;
        let b = BigUint::parse_bytes(balance.as_bytes(), 10)
            .ok_or_else(|| GenesisError::Malformed(format!("alloc {addr}: bad balance")))?;
        if alloc.insert(a, b).is_some() {
            return Err(GenesisError::Malformed(format!("alloc {addr}: duplicate address")));
        }
    }

    let extra = commit_definition(&file.chain_id, &alloc, &extra_data);
    let block = Block {
        header: BlockHeader {
            parent_hash: None,
            height: 0,
            timestamp_ms: file.timestamp_ms,
            producer,
            tx_root: compute_tx_root(&[]),
            extra,
        },
        transactions: Vec::new(),
    };

    Ok(GenesisBlock { chain_id: file.chain_id, alloc, block })
}

fn commit_definition(chain_id: &str, alloc: &BTreeMap<Address, BigUint>, extra_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(chain_id.len() as u64).to_be_bytes());
    out.extend_from_slice(chain_id.as_bytes());
    out.extend_from_slice(&(alloc.len() as u64).to_be_bytes());
    for (addr, balance) in alloc.iter() {
        let b = balance.to_bytes_be();
        out.extend_from_slice(addr.as_bytes());
        out.extend_from_slice(&(b.len() as u64).to_be_bytes());
        out.extend_from_slice(&b);
    }
    out.extend_from_slice(extra_data);
    out
}
