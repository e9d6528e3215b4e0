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

//! Node configuration (TOML). Every component receives its section explicitly.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Read(String),
    #[error("parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Node configuration root.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node settings.
    pub node: NodeSettings,
    /// HTTP endpoints.
    pub http: HttpConfig,
    /// P2P settings.
    pub p2p: NodeP2pConfig,
    /// Consensus settings.
    pub consensus: ConsensusConfig,
    /// Keystore settings.
    pub keystore: KdfParams,
}

impl NodeConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let cfg: NodeConfig = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.data_dir.trim().is_empty() {
            return Err(ConfigError::Invalid("node.data_dir is empty"));
        }
        if self.consensus.collection_window_ms == 0 {
            return Err(ConfigError::Invalid("consensus.collection_window_ms must be > 0"));
        }
        if self.consensus.topic_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("consensus.topic_prefix is empty"));
        }
        self.keystore.validate()
    }
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Human-readable name, also the node id on the in-process transport.
    pub name: String,
    /// Data directory (db + keystore).
    pub data_dir: String,
    /// Optional genesis file; the bundled genesis is used when unset.
    pub genesis_path: Option<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "amunchain-node".to_string(),
            data_dir: "./data".to_string(),
            genesis_path: None,
        }
    }
}

/// HTTP config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address, e.g. 0.0.0.0:9090.
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { listen_addr: "127.0.0.1:9090".to_string() }
    }
}

/// P2P config embedded in node config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeP2pConfig {
    /// Use libp2p gossipsub; when false the node runs on the in-process broker.
    pub enabled: bool,
    /// Listen multiaddr.
    pub listen_addr: String,
    /// Bootstrap peers to dial at startup.
    pub bootstrap: Vec<String>,
    /// Max accepted gossip payload.
    pub max_msg_bytes: usize,
}

impl Default for NodeP2pConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "/ip4/0.0.0.0/tcp/4001".to_string(),
            bootstrap: Vec::new(),
            max_msg_bytes: 64 * 1024,
        }
    }
}

/// Consensus config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Topic prefix; requests and responses use `<prefix>/request` and `<prefix>/response`.
    pub topic_prefix: String,
    /// Bounded vote collection window.
    pub collection_window_ms: u64,
    /// Number of peers expected to answer (0 => wait for the full window).
    pub expected_peers: usize,
}

impl ConsensusConfig {
    /// Topic carrying chain-hash requests.
    pub fn request_topic(&self) -> String {
        format!("{}/request", self.topic_prefix)
    }

    /// Topic carrying chain-hash responses.
    pub fn response_topic(&self) -> String {
        format!("{}/response", self.topic_prefix)
    }

    /// Collection window as a duration.
    pub fn collection_window(&self) -> Duration {
        Duration::from_millis(self.collection_window_ms)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "amunchain/consensus/v1".to_string(),
            collection_window_ms: 3_000,
            expected_peers: 0,
        }
    }
}

/// Argon2id parameters for keystore encryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Time cost (passes).
    pub iterations: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl KdfParams {
    /// Largest accepted memory cost (2 GiB).
    pub const MAX_MEMORY_KIB: u32 = 1 << 21;
    /// Largest accepted pass count.
    pub const MAX_ITERATIONS: u32 = 64;
    /// Largest accepted lane count.
    pub const MAX_PARALLELISM: u32 = 16;

    /// Cheap parameters for tests. Never use for real keys.
    pub const fn insecure_for_tests() -> Self {
        Self { memory_kib: 64, iterations: 1, parallelism: 1 }
    }

    /// Bounds enforced by argon2, plus local ceilings on cost.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 || self.iterations == 0 {
            return Err(ConfigError::Invalid("keystore kdf iterations/parallelism must be > 0"));
        }
        if self.memory_kib > Self::MAX_MEMORY_KIB
            || self.iterations > Self::MAX_ITERATIONS
            || self.parallelism > Self::MAX_PARALLELISM
        {
            return Err(ConfigError::Invalid("keystore kdf cost exceeds the supported maximum"));
        }
        let min_memory = u64::from(self.parallelism) * 8;
        if u64::from(self.memory_kib) < min_memory {
            return Err(ConfigError::Invalid("keystore kdf memory_kib must be >= 8 * parallelism"));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { memory_kib: 64 * 1024, iterations: 3, parallelism: 1 }
    }
}
