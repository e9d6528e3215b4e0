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

use std::{sync::Arc, time::Duration};

use amunchain_ledger::{
    core::{
        config::ConsensusConfig,
        consensus::coordinator::{ConsensusCoordinator, ConsensusError, CoordinatorState},
        types::{NodeId, H256},
    },
    networking::pubsub::{InMemoryBroker, PubSubBroker},
};

fn cfg(expected_peers: usize, window_ms: u64) -> ConsensusConfig {
    ConsensusConfig { expected_peers, collection_window_ms: window_ms, ..ConsensusConfig::default() }
}

fn h(b: u8) -> H256 {
    H256::from_bytes([b; 32])
}

/// Requester plus one simulated peer per entry in `answers`; peers holding
/// `None` stay silent. Returns the requester's round outcome.
async fn run_round(answers: &[Option<H256>], expected_peers: usize) -> (Result<H256, ConsensusError>, CoordinatorState) {
    let broker: Arc<dyn PubSubBroker> = Arc::new(InMemoryBroker::new());
    let c = cfg(expected_peers, 500);
    let me = ConsensusCoordinator::new(NodeId::from("requester"), c.clone(), broker.clone()).unwrap();
    let peers: Vec<(ConsensusCoordinator, Option<H256>)> = answers
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let node = ConsensusCoordinator::new(NodeId(format!("peer-{i}")), c.clone(), broker.clone()).unwrap();
            (node, *a)
        })
        .collect();

    let request_id = me.broadcast_request_to_network().unwrap();
    assert_eq!(me.state(), CoordinatorState::RequestBroadcast);

    for (peer, answer) in peers.iter() {
        let (from, rid) = peer.receive_request_from_network().await.unwrap();
        assert_eq!(from, NodeId::from("requester"));
        assert_eq!(rid, request_id);
        if let Some(hash) = answer {
            peer.send_response_to_peer(&from, rid, *hash).unwrap();
        }
    }

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        me.receive_majority_vote_consensus_response_from_network(),
    )
    .await
    .unwrap();
    (outcome, me.state())
}

#[tokio::test]
async fn three_of_five_resolve() {
    let answers = [Some(h(1)), Some(h(2)), Some(h(1)), Some(h(2)), Some(h(1))];
    let (outcome, state) = run_round(&answers, 5).await;
    assert_eq!(outcome.unwrap(), h(1));
    assert_eq!(state, CoordinatorState::Resolved(h(1)));
}

#[tokio::test]
async fn two_two_one_split_is_no_consensus() {
    let answers = [Some(h(1)), Some(h(1)), Some(h(2)), Some(h(2)), Some(h(3))];
    let (outcome, state) = run_round(&answers, 5).await;
    assert!(matches!(outcome, Err(ConsensusError::NoConsensus { responses: 5 })));
    assert_eq!(state, CoordinatorState::TimedOut);
}

#[tokio::test]
async fn majority_of_partial_responses_wins_after_window() {
    // Two peers partitioned away; both live answers agree.
    let answers = [Some(h(4)), None, Some(h(4)), None];
    let (outcome, _) = run_round(&answers, 0).await;
    assert_eq!(outcome.unwrap(), h(4));
}

#[tokio::test]
async fn silent_network_times_out() {
    let answers = [None, None, None];
    let (outcome, state) = run_round(&answers, 3).await;
    assert!(matches!(outcome, Err(ConsensusError::TimedOut)));
    assert_eq!(state, CoordinatorState::TimedOut);
}

#[tokio::test]
async fn responders_answer_with_their_canonical_hash() {
    let broker: Arc<dyn PubSubBroker> = Arc::new(InMemoryBroker::new());
    let c = cfg(3, 1_000);
    let me = ConsensusCoordinator::new(NodeId::from("requester"), c.clone(), broker.clone()).unwrap();

    let mut servers = Vec::new();
    for (i, hash) in [h(9), h(9), h(8)].into_iter().enumerate() {
        let node = Arc::new(ConsensusCoordinator::new(NodeId(format!("srv-{i}")), c.clone(), broker.clone()).unwrap());
        servers.push(tokio::spawn(async move { node.serve_requests(move || Some(hash)).await }));
    }

    me.broadcast_request_to_network().unwrap();
    let agreed = me.receive_majority_vote_consensus_response_from_network().await.unwrap();
    assert_eq!(agreed, h(9));

    broker.close();
    for s in servers {
        assert!(matches!(s.await.unwrap(), Err(ConsensusError::Transport(_))));
    }
}
