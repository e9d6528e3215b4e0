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

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Connected gossip peers.
    pub p2p_peers: IntGauge,
    /// Canonical head height.
    pub block_height: IntGauge,
    /// Transactions included in accepted blocks.
    pub transactions_total: IntCounter,

    /// Accounts created.
    pub accounts_created_total: IntCounter,
    /// Transactions that passed verification.
    pub tx_verified_total: IntCounter,
    /// Transactions that failed verification.
    pub tx_rejected_total: IntCounter,

    /// Consensus rounds started.
    pub consensus_rounds_total: IntCounter,
    /// Rounds that ended with zero responses.
    pub consensus_timeouts_total: IntCounter,
    /// Rounds without a strict majority.
    pub consensus_no_consensus_total: IntCounter,
    /// Undecodable consensus frames.
    pub consensus_invalid_frames_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let c = IntCounter::new(name, help).map_err(|_| MetricsError::Prom)?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|_| MetricsError::Prom)?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, MetricsError> {
    let g = IntGauge::new(name, help).map_err(|_| MetricsError::Prom)?;
    registry
        .register(Box::new(g.clone()))
        .map_err(|_| MetricsError::Prom)?;
    Ok(g)
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let p2p_peers = gauge(&registry, "amunchain_p2p_peers", "Connected peers")?;
        let block_height = gauge(&registry, "amunchain_block_height", "Current block height")?;
        let transactions_total = counter(
            &registry,
            "amunchain_transactions_total",
            "Transactions included in accepted blocks",
        )?;

        let accounts_created_total =
            counter(&registry, "amunchain_accounts_created_total", "Accounts created")?;
        let tx_verified_total = counter(
            &registry,
            "amunchain_tx_verified_total",
            "Transactions that verified",
        )?;
        let tx_rejected_total = counter(
            &registry,
            "amunchain_tx_rejected_total",
            "Transactions that failed verification",
        )?;

        let consensus_rounds_total = counter(
            &registry,
            "amunchain_consensus_rounds_total",
            "Consensus rounds started",
        )?;
        let consensus_timeouts_total = counter(
            &registry,
            "amunchain_consensus_timeouts_total",
            "Consensus rounds without responses",
        )?;
        let consensus_no_consensus_total = counter(
            &registry,
            "amunchain_consensus_no_consensus_total",
            "Consensus rounds without a strict majority",
        )?;
        let consensus_invalid_frames_total = counter(
            &registry,
            "amunchain_consensus_invalid_frames_total",
            "Undecodable consensus frames",
        )?;

        Ok(Self {
            registry,
            p2p_peers,
            block_height,
            transactions_total,
            accounts_created_total,
            tx_verified_total,
            tx_rejected_total,
            consensus_rounds_total,
            consensus_timeouts_total,
            consensus_no_consensus_total,
            consensus_invalid_frames_total,
        })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|_| MetricsError::Prom)?;
        String::from_utf8(buf).map_err(|_| MetricsError::Prom)
    }
}
