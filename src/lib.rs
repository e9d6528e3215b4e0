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

//! Amunchain ledger node - signed value transfers, hash-linked blocks and
//! majority-vote chain agreement.
//!
//! This repository provides:
//! - Encrypted-at-rest secp256k1 keystore and an account index
//! - Deterministic transaction hashing with recoverable signatures
//! - Hash-linked blocks with Merkle transaction roots and a bundled genesis
//! - A request/majority-vote consensus coordinator over a pub/sub transport
//! - Persistent key-value storage (sled), Prometheus metrics and an HTTP API

/// HTTP surface (accounts, key retrieval, transaction verification).
pub mod api;
/// Core protocol primitives (types, storage, keys, transactions, chain, consensus).
pub mod core;
/// Observability (metrics).
pub mod monitoring;
/// Pub/sub transports (in-process and libp2p gossipsub).
pub mod networking;
