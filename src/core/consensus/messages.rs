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

//! Wire frames for the canonical-hash request/vote protocol.

use serde::{Deserialize, Serialize};

use crate::core::types::{decode_canonical_limited, encode_canonical, CodecError, NodeId, H256};

/// Upper bound on a decoded consensus frame.
pub const MAX_CONSENSUS_FRAME_BYTES: usize = 4 * 1024;

/// Consensus frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMsg {
    /// "What is your canonical chain hash?"
    ChainHashRequest {
        /// Round identifier chosen by the requester.
        request_id: u64,
        /// Requesting node.
        requester: NodeId,
    },
    /// Directed answer to a request.
    ChainHashResponse {
        /// Round being answered.
        request_id: u64,
        /// Answering node.
        responder: NodeId,
        /// Requesting node.
        recipient: NodeId,
        /// Responder's canonical hash.
        chain_hash: H256,
    },
}

impl ConsensusMsg {
    /// Canonical bincode frame.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_canonical(self)
    }

    /// Decode an untrusted frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_canonical_limited(bytes, MAX_CONSENSUS_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_decode_back() {
        let m = ConsensusMsg::ChainHashResponse {
            request_id: 9,
            responder: NodeId::from("b"),
            recipient: NodeId::from("a"),
            chain_hash: H256::from_bytes([1; 32]),
        };
        assert_eq!(ConsensusMsg::decode(&m.encode().unwrap()).unwrap(), m);
    }

    #[test]
    fn junk_and_oversized_frames_fail() {
        assert!(ConsensusMsg::decode(&[0xff, 0xff, 0xff]).is_err());
        assert!(ConsensusMsg::decode(&vec![0u8; MAX_CONSENSUS_FRAME_BYTES + 1]).is_err());

        let huge = ConsensusMsg::ChainHashRequest {
            request_id: 1,
            requester: NodeId("x".repeat(MAX_CONSENSUS_FRAME_BYTES)),
        };
        assert!(ConsensusMsg::decode(&huge.encode().unwrap()).is_err());
    }
}
