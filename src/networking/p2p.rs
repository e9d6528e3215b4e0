// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0

//! libp2p gossipsub backend for [`PubSubBroker`].
//!
//! The swarm runs on its own task and is driven through a command channel.
//! Inbound gossip is fanned out to local subscribers by topic name.

#![forbid(unsafe_code)]

use futures::StreamExt;
use libp2p::{
    core::upgrade,
    gossipsub::{self, IdentTopic, MessageAuthenticity},
    identity, noise,
    swarm::{Config as SwarmConfig, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Transport,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    core::config::NodeP2pConfig,
    monitoring::metrics::Metrics,
    networking::{
        p2p_identity::{load_or_create_identity, IdentityError},
        pubsub::{PubSubBroker, PubSubError, Subscription},
    },
};

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),
    #[error("transport: {0}")]
    Transport(String),
    #[error("config: {0}")]
    Config(String),
}

enum Command {
    Subscribe(String),
    Publish { topic: String, data: Vec<u8> },
    Shutdown,
}

#[derive(Default)]
struct Shared {
    local: BTreeMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    remote: BTreeMap<String, BTreeSet<PeerId>>,
}

/// [`PubSubBroker`] over gossipsub (TCP + Noise + Yamux).
pub struct GossipsubBroker {
    peer_id: PeerId,
    max_msg_bytes: usize,
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
    closed: AtomicBool,
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>, PubSubError> {
    shared
        .lock()
        .map_err(|_| PubSubError::Transport("p2p state poisoned".to_string()))
}

impl GossipsubBroker {
    /// Local peer id.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn send(&self, cmd: Command) -> Result<(), PubSubError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PubSubError::Closed);
        }
        self.cmd_tx.send(cmd).map_err(|_| PubSubError::Closed)
    }
}

impl PubSubBroker for GossipsubBroker {
    fn subscribe(&self, topic: &str) -> Result<Subscription, PubSubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe(topic.to_string()))?;
        lock(&self.shared)?.local.entry(topic.to_string()).or_default().push(tx);
        Ok(Subscription::new(topic, rx))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubSubError> {
        if payload.len() > self.max_msg_bytes {
            return Err(PubSubError::Transport(format!(
                "payload of {} bytes exceeds limit",
                payload.len()
            )));
        }
        if !self.is_connected(topic) {
            return Err(PubSubError::Transport(format!("no peers on {topic}")));
        }
        self.send(Command::Publish { topic: topic.to_string(), data: payload.to_vec() })
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut s) = self.shared.lock() {
            s.local.clear();
            s.remote.clear();
        }
    }

    fn is_connected(&self, topic: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.shared
            .lock()
            .map(|s| s.remote.get(topic).map(|p| !p.is_empty()).unwrap_or(false))
            .unwrap_or(false)
    }
}

fn build_swarm(
    key: &identity::Keypair,
    max_msg_bytes: usize,
) -> Result<Swarm<gossipsub::Behaviour>, P2pError> {
    let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
        .upgrade(upgrade::Version::V1)
        .authenticate(noise::Config::new(key).map_err(|e| P2pError::Transport(e.to_string()))?)
        .multiplex(yamux::Config::default())
        .boxed();

    let gossip_cfg = gossipsub::ConfigBuilder::default()
        .max_transmit_size(max_msg_bytes)
        .heartbeat_interval(Duration::from_secs(1))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .build()
        .map_err(|e| P2pError::Config(e.to_string()))?;
    let gossipsub = gossipsub::Behaviour::new(MessageAuthenticity::Signed(key.clone()), gossip_cfg)
        .map_err(|e| P2pError::Config(e.to_string()))?;

    let swarm_cfg =
        SwarmConfig::with_tokio_executor().with_idle_connection_timeout(Duration::from_secs(60));
    Ok(Swarm::new(transport, gossipsub, PeerId::from(key.public()), swarm_cfg))
}

/// Start the swarm task. Must be called inside a tokio runtime.
pub fn spawn_p2p(
    cfg: &NodeP2pConfig,
    data_dir: &Path,
    metrics: Option<Arc<Metrics>>,
) -> Result<(Arc<GossipsubBroker>, JoinHandle<()>), P2pError> {
    let (peer_id, key) = load_or_create_identity(data_dir)?;
    let mut swarm = build_swarm(&key, cfg.max_msg_bytes)?;

    let listen: Multiaddr = cfg
        .listen_addr
        .parse()
        .map_err(|_| P2pError::Config(format!("bad listen addr {}", cfg.listen_addr)))?;
    swarm
        .listen_on(listen)
        .map_err(|e| P2pError::Transport(e.to_string()))?;

    for addr in cfg.bootstrap.iter() {
        match addr.parse::<Multiaddr>() {
            Ok(ma) => {
                if let Err(e) = swarm.dial(ma) {
                    warn!(%addr, error = %e, "bootstrap dial failed");
                }
            }
            Err(_) => warn!(%addr, "ignoring malformed bootstrap address"),
        }
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Mutex::new(Shared::default()));
    let broker = Arc::new(GossipsubBroker {
        peer_id,
        max_msg_bytes: cfg.max_msg_bytes,
        cmd_tx,
        shared: shared.clone(),
        closed: AtomicBool::new(false),
    });

    info!(%peer_id, listen = %cfg.listen_addr, "p2p starting");
    let join = tokio::spawn(run_swarm(swarm, cmd_rx, shared, metrics));
    Ok((broker, join))
}

async fn run_swarm(
    mut swarm: Swarm<gossipsub::Behaviour>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Mutex<Shared>>,
    metrics: Option<Arc<Metrics>>,
) {
    let mut connected: BTreeSet<PeerId> = BTreeSet::new();
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Subscribe(topic)) => {
                    if let Err(e) = swarm.behaviour_mut().subscribe(&IdentTopic::new(topic.as_str())) {
                        warn!(%topic, error = ?e, "gossip subscribe failed");
                    }
                }
                Some(Command::Publish { topic, data }) => {
                    if let Err(e) = swarm.behaviour_mut().publish(IdentTopic::new(topic.as_str()), data) {
                        warn!(%topic, error = ?e, "gossip publish failed");
                    }
                }
                Some(Command::Shutdown) | None => {
                    info!("p2p stopped");
                    break;
                }
            },
            event = swarm.select_next_some() => match event {
                SwarmEvent::Behaviour(gossipsub::Event::Message { propagation_source, message, .. }) => {
                    let topic = message.topic.as_str().to_string();
                    debug!(%topic, peer = %propagation_source, bytes = message.data.len(), "gossip received");
                    if let Ok(mut s) = shared.lock() {
                        if let Some(subs) = s.local.get_mut(&topic) {
                            subs.retain(|tx| tx.send(message.data.clone()).is_ok());
                        }
                    }
                }
                SwarmEvent::Behaviour(gossipsub::Event::Subscribed { peer_id, topic }) => {
                    if let Ok(mut s) = shared.lock() {
                        s.remote.entry(topic.as_str().to_string()).or_default().insert(peer_id);
                    }
                }
                SwarmEvent::Behaviour(gossipsub::Event::Unsubscribed { peer_id, topic }) => {
                    if let Ok(mut s) = shared.lock() {
                        if let Some(peers) = s.remote.get_mut(topic.as_str()) {
                            peers.remove(&peer_id);
                        }
                    }
                }
                SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                    connected.insert(peer_id);
                    if let Some(m) = &metrics {
                        m.p2p_peers.set(connected.len() as i64);
                    }
                    debug!(peer = %peer_id, "peer connected");
                }
                SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                    if num_established == 0 {
                        connected.remove(&peer_id);
                        if let Ok(mut s) = shared.lock() {
                            for peers in s.remote.values_mut() {
                                peers.remove(&peer_id);
                            }
                        }
                        if let Some(m) = &metrics {
                            m.p2p_peers.set(connected.len() as i64);
                        }
                    }
                    debug!(peer = %peer_id, "peer disconnected");
                }
                SwarmEvent::NewListenAddr { address, .. } => {
                    info!(%address, "p2p listening");
                }
                _ => {}
            },
        }
    }

    if let Ok(mut s) = shared.lock() {
        s.local.clear();
        s.remote.clear();
    }
}
