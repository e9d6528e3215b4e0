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

//! Request/majority-vote agreement on the canonical chain hash.
//!
//! A round is `Idle -> RequestBroadcast -> CollectingVotes -> Resolved | TimedOut`.
//! The coordinator never retries; callers own backoff.

use ring::rand::{SecureRandom, SystemRandom};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::{
    core::{
        config::ConsensusConfig,
        consensus::messages::ConsensusMsg,
        types::{NodeId, H256},
    },
    monitoring::metrics::Metrics,
    networking::pubsub::{PubSubBroker, PubSubError, Subscription},
};

/// Consensus errors.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Broker failure; may be transient.
    #[error("transport: {0}")]
    Transport(String),
    /// Responses arrived but no hash held a strict majority.
    #[error("no consensus reached ({responses} responses)")]
    NoConsensus {
        /// Responses counted.
        responses: usize,
    },
    /// The window closed without any response.
    #[error("consensus round timed out")]
    TimedOut,
    /// Operation not valid in the current round state.
    #[error("invalid round state: {0:?}")]
    InvalidState(CoordinatorState),
    /// Frame could not be built.
    #[error("codec")]
    Codec,
    /// Request id generation failed.
    #[error("rng")]
    Rng,
}

impl From<PubSubError> for ConsensusError {
    fn from(e: PubSubError) -> Self {
        ConsensusError::Transport(e.to_string())
    }
}

/// Round state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No round in flight.
    Idle,
    /// Request published, collection not started.
    RequestBroadcast,
    /// Waiting for votes.
    CollectingVotes,
    /// Majority found.
    Resolved(H256),
    /// Round ended without a majority.
    TimedOut,
}

struct Round {
    state: CoordinatorState,
    request_id: Option<u64>,
}

/// Strict majority over the received votes (`count * 2 > votes`).
/// Zero votes is a timeout; ties and pluralities are `NoConsensus`.
pub fn tally_majority(votes: &BTreeMap<NodeId, H256>) -> Result<H256, ConsensusError> {
    if votes.is_empty() {
        return Err(ConsensusError::TimedOut);
    }
    let mut counts: BTreeMap<H256, usize> = BTreeMap::new();
    for hash in votes.values() {
        *counts.entry(*hash).or_insert(0) += 1;
    }
    let n = votes.len();
    counts
        .into_iter()
        .find(|(_, c)| c * 2 > n)
        .map(|(h, _)| h)
        .ok_or(ConsensusError::NoConsensus { responses: n })
}

/// One node's side of the protocol.
pub struct ConsensusCoordinator {
    node_id: NodeId,
    cfg: ConsensusConfig,
    broker: Arc<dyn PubSubBroker>,
    requests: tokio::sync::Mutex<Subscription>,
    responses: tokio::sync::Mutex<Subscription>,
    round: Mutex<Round>,
    rng: SystemRandom,
    metrics: Option<Arc<Metrics>>,
}

impl ConsensusCoordinator {
    /// Subscribe to the request and response topics of `cfg`.
    pub fn new(
        node_id: NodeId,
        cfg: ConsensusConfig,
        broker: Arc<dyn PubSubBroker>,
    ) -> Result<Self, ConsensusError> {
        let requests = broker.subscribe(&cfg.request_topic())?;
        let responses = broker.subscribe(&cfg.response_topic())?;
        Ok(Self {
            node_id,
            cfg,
            broker,
            requests: tokio::sync::Mutex::new(requests),
            responses: tokio::sync::Mutex::new(responses),
            round: Mutex::new(Round { state: CoordinatorState::Idle, request_id: None }),
            rng: SystemRandom::new(),
            metrics: None,
        })
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Current round state.
    pub fn state(&self) -> CoordinatorState {
        self.round
            .lock()
            .map(|r| r.state)
            .unwrap_or(CoordinatorState::Idle)
    }

    fn round(&self) -> Result<MutexGuard<'_, Round>, ConsensusError> {
        self.round
            .lock()
            .map_err(|_| ConsensusError::Transport("round lock poisoned".to_string()))
    }

    fn invalid_frame(&self, topic: &str) {
        debug!(topic, "undecodable consensus frame");
        if let Some(m) = &self.metrics {
            m.consensus_invalid_frames_total.inc();
        }
    }

    fn next_request_id(&self) -> Result<u64, ConsensusError> {
        let mut b = [0u8; 8];
        self.rng.fill(&mut b).map_err(|_| ConsensusError::Rng)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Publish a chain-hash request and start a new round. Valid from any
    /// state except an active collection. The state only moves on success.
    pub fn broadcast_request_to_network(&self) -> Result<u64, ConsensusError> {
        let mut round = self.round()?;
        if matches!(round.state, CoordinatorState::CollectingVotes) {
            return Err(ConsensusError::InvalidState(round.state));
        }
        let request_id = self.next_request_id()?;
        let frame = ConsensusMsg::ChainHashRequest { request_id, requester: self.node_id.clone() }
            .encode()
            .map_err(|_| ConsensusError::Codec)?;

        // Drop responses left over from earlier rounds.
        if let Ok(mut sub) = self.responses.try_lock() {
            while sub.try_next().is_some() {}
        }

        self.broker.publish(&self.cfg.request_topic(), &frame)?;
        round.state = CoordinatorState::RequestBroadcast;
        round.request_id = Some(request_id);
        if let Some(m) = &self.metrics {
            m.consensus_rounds_total.inc();
        }
        info!(node = %self.node_id, request_id, "consensus request broadcast");
        Ok(request_id)
    }

    /// Wait for the next request from another node.
    pub async fn receive_request_from_network(&self) -> Result<(NodeId, u64), ConsensusError> {
        let mut sub = self.requests.lock().await;
        loop {
            let frame = sub
                .next()
                .await
                .ok_or_else(|| ConsensusError::Transport("request subscription closed".to_string()))?;
            match ConsensusMsg::decode(&frame) {
                Ok(ConsensusMsg::ChainHashRequest { request_id, requester }) => {
                    if requester == self.node_id {
                        continue;
                    }
                    debug!(peer = %requester, request_id, "consensus request received");
                    return Ok((requester, request_id));
                }
                Ok(ConsensusMsg::ChainHashResponse { .. }) => continue,
                Err(_) => self.invalid_frame(sub.topic()),
            }
        }
    }

    /// Answer `peer`'s request with this node's canonical hash.
    pub fn send_response_to_peer(
        &self,
        peer: &NodeId,
        request_id: u64,
        chain_hash: H256,
    ) -> Result<(), ConsensusError> {
        let frame = ConsensusMsg::ChainHashResponse {
            request_id,
            responder: self.node_id.clone(),
            recipient: peer.clone(),
            chain_hash,
        }
        .encode()
        .map_err(|_| ConsensusError::Codec)?;
        self.broker.publish(&self.cfg.response_topic(), &frame)?;
        debug!(peer = %peer, request_id, hash = %chain_hash, "consensus response sent");
        Ok(())
    }

    /// Collect votes for the broadcast request and resolve them.
    pub async fn receive_majority_vote_consensus_response_from_network(
        &self,
    ) -> Result<H256, ConsensusError> {
        let request_id = {
            let mut round = self.round()?;
            match (round.state, round.request_id) {
                (CoordinatorState::RequestBroadcast, Some(id)) => {
                    round.state = CoordinatorState::CollectingVotes;
                    id
                }
                (state, _) => return Err(ConsensusError::InvalidState(state)),
            }
        };

        let collected = self.collect_votes(request_id).await;
        let outcome = match collected {
            Ok(votes) => tally_majority(&votes),
            Err(e) => Err(e),
        };

        let mut round = self.round()?;
        match &outcome {
            Ok(hash) => {
                round.state = CoordinatorState::Resolved(*hash);
                info!(request_id, %hash, "consensus resolved");
            }
            Err(e) => {
                round.state = CoordinatorState::TimedOut;
                if let Some(m) = &self.metrics {
                    match e {
                        ConsensusError::NoConsensus { .. } => m.consensus_no_consensus_total.inc(),
                        ConsensusError::TimedOut => m.consensus_timeouts_total.inc(),
                        _ => {}
                    }
                }
                warn!(request_id, error = %e, "consensus round failed");
            }
        }
        outcome
    }

    async fn collect_votes(&self, request_id: u64) -> Result<BTreeMap<NodeId, H256>, ConsensusError> {
        let deadline = Instant::now() + self.cfg.collection_window();
        let expected = self.cfg.expected_peers;
        let mut votes: BTreeMap<NodeId, H256> = BTreeMap::new();
        let mut sub = self.responses.lock().await;

        loop {
            let frame = match timeout_at(deadline, sub.next()).await {
                Err(_) => break,
                Ok(None) if votes.is_empty() => {
                    return Err(ConsensusError::Transport("response subscription closed".to_string()))
                }
                Ok(None) => break,
                Ok(Some(frame)) => frame,
            };
            let (responder, chain_hash) = match ConsensusMsg::decode(&frame) {
                Ok(ConsensusMsg::ChainHashResponse { request_id: rid, responder, recipient, chain_hash })
                    if rid == request_id && recipient == self.node_id =>
                {
                    (responder, chain_hash)
                }
                Ok(_) => continue,
                Err(_) => {
                    self.invalid_frame(sub.topic());
                    continue;
                }
            };
            if votes.contains_key(&responder) {
                debug!(peer = %responder, request_id, "duplicate vote ignored");
                continue;
            }
            votes.insert(responder, chain_hash);

            if expected > 0 && (votes.len() >= expected || leader_has_majority_of(&votes, expected)) {
                break;
            }
        }
        Ok(votes)
    }

    /// Answer every inbound request with `canonical()` until the transport
    /// closes. Requests arriving before a canonical hash exists are skipped.
    pub async fn serve_requests<F>(&self, canonical: F) -> Result<(), ConsensusError>
    where
        F: Fn() -> Option<H256>,
    {
        loop {
            let (peer, request_id) = self.receive_request_from_network().await?;
            let Some(hash) = canonical() else {
                debug!(peer = %peer, request_id, "no canonical hash yet");
                continue;
            };
            if let Err(e) = self.send_response_to_peer(&peer, request_id, hash) {
                warn!(request_id, error = %e, "consensus response failed");
            }
        }
    }
}

fn leader_has_majority_of(votes: &BTreeMap<NodeId, H256>, expected: usize) -> bool {
    let mut counts: BTreeMap<&H256, usize> = BTreeMap::new();
    for h in votes.values() {
        *counts.entry(h).or_insert(0) += 1;
    }
    counts.values().any(|c| c * 2 > expected)
}
